use crate::error::CallError;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;

/// A value a call produces exactly once, awaitable from any number of places.
pub type OutcomeFuture<T> = BoxFuture<'static, T>;

/// One-shot result slot. The first `resolve` wins; later ones are rejected.
#[derive(Debug)]
pub(crate) struct Outcome<T> {
    name: &'static str,
    slot: watch::Sender<Option<T>>,
}

impl<T> Outcome<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        let (slot, _) = watch::channel(None);
        Self { name, slot }
    }

    pub fn resolve(&self, value: T) -> Result<(), CallError> {
        let mut value = Some(value);
        let resolved = self.slot.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = value.take();
            true
        });
        if resolved {
            Ok(())
        } else {
            Err(CallError::AlreadyResolved(self.name))
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn peek(&self) -> Option<T> {
        self.slot.borrow().clone()
    }

    /// Wait for the value. Yields `None` only if the slot was dropped unresolved.
    pub fn wait(&self) -> OutcomeFuture<Option<T>> {
        let mut receiver = self.slot.subscribe();
        async move {
            match receiver.wait_for(Option::is_some).await {
                Ok(value) => (*value).clone(),
                Err(_) => None,
            }
        }
        .boxed()
    }
}
