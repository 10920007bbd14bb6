use crate::annotation::AnnotationStore;

/// Receives a snapshot opportunity right before the store is mutated.
pub trait UndoHook: Send {
    fn about_to_mutate(&mut self, store: &AnnotationStore);
}

/// Fires the hook once per unbroken user action.
#[derive(Default)]
pub struct UndoGate {
    hook: Option<Box<dyn UndoHook>>,
    fired: bool,
}

impl UndoGate {
    pub fn new(hook: Option<Box<dyn UndoHook>>) -> Self {
        Self { hook, fired: false }
    }

    pub fn set_hook(&mut self, hook: Box<dyn UndoHook>) {
        self.hook = Some(hook);
    }

    pub fn take_hook(&mut self) -> Option<Box<dyn UndoHook>> {
        self.hook.take()
    }

    pub fn notify(&mut self, store: &AnnotationStore) {
        if self.fired {
            return;
        }
        self.fired = true;
        if let Some(hook) = self.hook.as_mut() {
            hook.about_to_mutate(store);
        }
    }

    /// The current action ended; the next mutation notifies again.
    pub fn reset(&mut self) {
        self.fired = false;
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}
