use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use tokio::sync::watch;

/// Calls deduplicated by key.
///
/// While a call for a key is in flight, later callers with the same key wait
/// for it and receive a clone of its value instead of calling again. Different
/// keys never wait on each other. An entry lives only while its call runs.
pub struct KeyedFlight<K, V> {
  inflight: parking_lot::Mutex<HashMap<K, watch::Receiver<Option<V>>>>,
}

enum Role<V> {
  Leader(watch::Sender<Option<V>>),
  Waiter(watch::Receiver<Option<V>>),
}

impl<K, V> Default for KeyedFlight<K, V> {
  fn default() -> Self {
    Self {
      inflight: parking_lot::Mutex::new(HashMap::new()),
    }
  }
}

impl<K: Eq + Hash + Clone, V: Clone> KeyedFlight<K, V> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Run `call` for `key`, or share the value of the call already running.
  ///
  /// A leader dropped before finishing hands the call to one of its waiters.
  pub async fn run<F, Fut>(&self, key: K, call: F) -> V
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = V>,
  {
    loop {
      let role = {
        let mut inflight = self.inflight.lock();
        match inflight.get(&key) {
          Some(receiver) => Role::Waiter(receiver.clone()),
          None => {
            let (sender, receiver) = watch::channel(None);
            inflight.insert(key.clone(), receiver);
            Role::Leader(sender)
          }
        }
      };

      match role {
        Role::Leader(sender) => {
          let _entry = InflightEntry { owner: self, key };
          let value = call().await;
          sender.send_replace(Some(value.clone()));
          return value;
        }
        Role::Waiter(mut receiver) => {
          // Closed without a value: the leader was dropped, try again.
          let published = match receiver.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
          };
          if let Some(value) = published {
            return value;
          }
        }
      }
    }
  }

  /// Number of keys with a call in flight.
  pub fn len(&self) -> usize {
    self.inflight.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Removes the leader's entry once its call ends or is dropped.
struct InflightEntry<'a, K: Eq + Hash, V> {
  owner: &'a KeyedFlight<K, V>,
  key: K,
}

impl<K: Eq + Hash, V> Drop for InflightEntry<'_, K, V> {
  fn drop(&mut self) {
    self.owner.inflight.lock().remove(&self.key);
  }
}
