use crate::errors::EngineError;

/// A named-event fabric: handlers run synchronously, in registration order,
/// on the caller's thread. A handler that fails does not stop the rest of
/// the handlers, and its error is never propagated back into `emit` --
/// it is reported through the `on_error` callback instead (typically the
/// owning component's own `error` event).
pub struct Emitter<E> {
    handlers: Vec<Box<dyn Fn(&E) -> Result<(), EngineError> + Send + Sync>>,
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn on(&mut self, handler: impl Fn(&E) -> Result<(), EngineError> + Send + Sync + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Invoke every registered handler with `event`, in registration order.
    /// Any handler error is passed to `on_error`; subsequent handlers still run.
    pub fn emit(&self, event: &E, mut on_error: impl FnMut(&EngineError)) {
        for handler in &self.handlers {
            if let Err(e) = handler(event) {
                on_error(&e);
            }
        }
    }
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn handlers_invoked_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut emitter: Emitter<()> = Emitter::new();
        for i in 0..3 {
            let order = order.clone();
            emitter.on(move |_| {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }
        emitter.emit(&(), |_| panic!("no errors expected"));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn failing_handler_does_not_block_later_handlers() {
        let ran_second = Arc::new(AtomicUsize::new(0));
        let mut emitter: Emitter<()> = Emitter::new();
        emitter.on(|_| Err(EngineError::Execution("boom".into())));
        let ran_second2 = ran_second.clone();
        emitter.on(move |_| {
            ran_second2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut errors_seen = 0;
        emitter.emit(&(), |_| errors_seen += 1);

        assert_eq!(ran_second.load(Ordering::SeqCst), 1);
        assert_eq!(errors_seen, 1);
    }

    #[test]
    fn emit_with_no_handlers_is_a_no_op() {
        let emitter: Emitter<()> = Emitter::new();
        emitter.emit(&(), |_| panic!("no handlers registered"));
    }
}
