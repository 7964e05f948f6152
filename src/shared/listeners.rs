use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

type ListenerList<E> = Mutex<Vec<(u64, Listener<E>)>>;

/// コンポーネントごとに所有するリスナー登録簿。
///
/// `subscribe` は登録解除用の [`Subscription`] を返す。通知はロックの外で行うため、
/// リスナー内から購読・解除しても良い。
pub struct ListenerRegistry<E> {
    listeners: Arc<ListenerList<E>>,
    next_id: AtomicU64,
}

impl<E: 'static> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, listener: Listener<E>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut guard) = self.listeners.lock() {
            guard.push((id, listener));
        }

        let weak: Weak<ListenerList<E>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                if let Ok(mut guard) = listeners.lock() {
                    guard.retain(|(entry_id, _)| *entry_id != id);
                }
            }
        })
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = match self.listeners.lock() {
            Ok(guard) => guard.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            listener(event);
        }
    }
}

impl<E: 'static> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// 登録解除ハンドル。破棄しても解除されない（明示的に `unsubscribe` を呼ぶ）。
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_subscribers_until_unsubscribed() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let subscription = registry.subscribe(Arc::new(move |value: &u32| {
            counter.fetch_add(*value as usize, Ordering::SeqCst);
        }));

        registry.emit(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        subscription.unsubscribe();
        registry.emit(&5);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
