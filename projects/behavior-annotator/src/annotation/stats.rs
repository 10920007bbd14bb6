use super::store::AnnotationStore;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviorStats {
    pub behavior: String,
    /// Number of contiguous runs of labeled frames.
    pub block_count: usize,
    pub total_frames: usize,
    pub max_duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationStats {
    pub total_frames: usize,
    pub frame_rate: f64,
    pub video_duration_secs: f64,
    /// Frames carrying at least one label.
    pub labeled_frames: usize,
    pub labeled_percentage: f64,
    pub behaviors: Vec<BehaviorStats>,
}

pub fn compute(store: &AnnotationStore, behaviors: &[String], frame_rate: f64) -> AnnotationStats {
    let total_frames = store.total_frames();
    let seconds = |frames: usize| {
        if frame_rate > 0.0 {
            frames as f64 / frame_rate
        } else {
            0.0
        }
    };

    let behaviors = behaviors
        .iter()
        .map(|behavior| {
            let mut block_count = 0;
            let mut labeled = 0;
            let mut longest = 0;
            let mut run = 0;
            let mut previous: Option<usize> = None;

            for frame in store.frames_with(behavior) {
                labeled += 1;
                if previous.map(|p| p + 1 == frame).unwrap_or(false) {
                    run += 1;
                } else {
                    block_count += 1;
                    run = 1;
                }
                longest = longest.max(run);
                previous = Some(frame);
            }

            BehaviorStats {
                behavior: behavior.clone(),
                block_count,
                total_frames: labeled,
                max_duration_secs: seconds(longest),
            }
        })
        .collect();

    let labeled_frames = store.len();
    let labeled_percentage = if total_frames > 0 {
        labeled_frames as f64 / total_frames as f64 * 100.0
    } else {
        0.0
    };

    AnnotationStats {
        total_frames,
        frame_rate,
        video_duration_secs: seconds(total_frames),
        labeled_frames,
        labeled_percentage,
        behaviors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::store::RangeOptions;

    #[test]
    fn test_blocks_and_longest_bout() {
        let mut store = AnnotationStore::new(100);
        let opts = RangeOptions::default();
        store.apply_range("rearing", 0, 9, opts);
        store.apply_range("rearing", 20, 49, opts);
        store.apply_range("rearing", 60, 60, opts);
        store.apply_range("passive", 40, 59, opts);

        let behaviors = vec!["rearing".to_string(), "passive".to_string(), "fighting".to_string()];
        let stats = compute(&store, &behaviors, 10.0);

        assert_eq!(stats.behaviors[0].block_count, 3);
        assert_eq!(stats.behaviors[0].total_frames, 41);
        assert_eq!(stats.behaviors[0].max_duration_secs, 3.0);
        assert_eq!(stats.behaviors[1].block_count, 1);
        assert_eq!(stats.behaviors[2].block_count, 0);

        // 0..=9, 20..=59, 60 overlapping frames counted once.
        assert_eq!(stats.labeled_frames, 51);
        assert!((stats.labeled_percentage - 51.0).abs() < 1e-9);
        assert_eq!(stats.video_duration_secs, 10.0);
    }

    #[test]
    fn test_empty_video() {
        let stats = compute(&AnnotationStore::new(0), &[], 0.0);
        assert_eq!(stats.labeled_percentage, 0.0);
        assert_eq!(stats.video_duration_secs, 0.0);
    }
}
