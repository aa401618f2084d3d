//! Shared watch/cache factory.
//!
//! Each registered type gets one reflector-backed store scoped to the operator's
//! namespace. Controllers read from the stores and are triggered from the same
//! watch through a feed; the factory drives every watch.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::{
    channel::mpsc::{self, UnboundedSender},
    Stream, StreamExt,
};
use kube::{
    core::NamespaceResourceScope,
    runtime::{
        reflector::{self, reflector, Store},
        watcher, WatchStreamExt,
    },
    Client, Resource,
};
use serde::de::DeserializeOwned;
use sparkop_core::ShutdownObserver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::NamespaceScope;

type Driver = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Objects applied to a shared store, in watch order.
pub type Feed<K> = mpsc::UnboundedReceiver<K>;

/// Periodic resync trigger handed to controllers.
pub type Ticks = Pin<Box<dyn Stream<Item = ()> + Send + Sync>>;

pub struct WatchFactory {
    client: Client,
    scope: NamespaceScope,
    resync: Duration,
    drivers: Vec<Driver>,
    kinds: Vec<String>,
}

impl WatchFactory {
    pub fn new(client: Client, scope: NamespaceScope, resync: Duration) -> Self {
        Self { client, scope, resync, drivers: Vec::new(), kinds: Vec::new() }
    }

    /// Register `K` and return its shared read-only store plus a feed of every
    /// object the store applies.
    ///
    /// The store stays empty until [`start`](Self::start) is called.
    pub fn informer_with_feed<K>(&mut self) -> (Store<K>, Feed<K>)
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    {
        let (tx, feed) = mpsc::unbounded();
        let (reader, writer) = reflector::store::<K>();
        let kind = K::kind(&()).to_string();
        let api = self.scope.api::<K>(self.client.clone());
        let events = reflector(writer, watcher(api, watcher::Config::default()).default_backoff()).applied_objects();
        self.drivers.push(Box::pin(forward(kind.clone(), events, tx)));
        self.kinds.push(kind);
        (reader, feed)
    }

    /// Periodic resync trigger using this factory's period.
    pub fn resync_ticks(&self) -> Ticks {
        Box::pin(ticks_every(self.resync))
    }

    /// Drive all registered watches on a detached task until shutdown.
    pub fn start(self, shutdown: ShutdownObserver) -> JoinHandle<()> {
        let WatchFactory { scope, drivers, kinds, .. } = self;
        info!(namespace = %scope, kinds = ?kinds, "watch factory starting");
        tokio::spawn(async move {
            tokio::select! {
                _ = futures::future::join_all(drivers) => warn!("all watch streams ended"),
                _ = shutdown.closed() => debug!("watch factory stopping on shutdown"),
            }
        })
    }
}

/// Poll a reflected watch, passing applied objects to `feed` while it has a reader.
///
/// The store is updated by polling alone, so a dropped feed never stalls it.
async fn forward<K, S>(kind: String, events: S, feed: UnboundedSender<K>)
where
    S: Stream<Item = Result<K, watcher::Error>>,
{
    let mut feed = Some(feed);
    futures::pin_mut!(events);
    while let Some(ev) = events.next().await {
        match ev {
            Ok(obj) => {
                if let Some(tx) = &feed {
                    if tx.unbounded_send(obj).is_err() {
                        debug!(kind = %kind, "feed closed; keeping the cache only");
                        feed = None;
                    }
                }
            }
            Err(e) => warn!(kind = %kind, error = %e, "watch error; backing off"),
        }
    }
    warn!(kind = %kind, "watch stream ended");
}

/// Ticks every `period`, starting one period from now.
fn ticks_every(period: Duration) -> impl Stream<Item = ()> + Send + Sync + 'static {
    let period = period.max(Duration::from_secs(1));
    let start = tokio::time::Instant::now() + period;
    futures::stream::unfold(tokio::time::interval_at(start, period), |mut iv| async move {
        iv.tick().await;
        Some(((), iv))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn cm(name: &str) -> ConfigMap {
        ConfigMap { metadata: ObjectMeta { name: Some(name.into()), ..Default::default() }, ..Default::default() }
    }

    #[tokio::test(start_paused = true)]
    async fn resync_ticks_follow_period() {
        let t0 = tokio::time::Instant::now();
        let ticks = ticks_every(Duration::from_secs(30));
        futures::pin_mut!(ticks);
        ticks.next().await;
        assert_eq!(t0.elapsed(), Duration::from_secs(30));
        ticks.next().await;
        assert_eq!(t0.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_clamped() {
        let t0 = tokio::time::Instant::now();
        let ticks = ticks_every(Duration::ZERO);
        futures::pin_mut!(ticks);
        ticks.next().await;
        assert_eq!(t0.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn applied_objects_reach_the_feed_and_errors_do_not() {
        let events = futures::stream::iter(vec![
            Ok(cm("a")),
            Err(watcher::Error::NoResourceVersion),
            Ok(cm("b")),
        ]);
        let (tx, rx) = mpsc::unbounded();
        forward("ConfigMap".into(), events, tx).await;
        let names: Vec<_> = rx.map(|o| o.metadata.name.unwrap_or_default()).collect().await;
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn dropped_feed_keeps_the_watch_polled() {
        let (tx, rx) = mpsc::unbounded();
        drop(rx);
        let polled = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = polled.clone();
        let events = futures::stream::iter(vec![cm("a"), cm("b"), cm("c")]).map(move |o| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok::<_, watcher::Error>(o)
        });
        forward("ConfigMap".into(), events, tx).await;
        assert_eq!(polled.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
