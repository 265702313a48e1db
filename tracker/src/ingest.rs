use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use crate::{
    models::{Fix, GeoPoint, RawFix},
    store::{LAST_KNOWN_FIX_KEY, LocationStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("latitude or longitude missing")]
    MissingCoordinate,
    #[error("latitude or longitude is not a number")]
    NotANumber,
    #[error("coordinate outside the valid range")]
    OutOfRange,
    #[error("(0, 0) means the device has no position yet")]
    NoData,
}

#[derive(Debug)]
enum StoreOp {
    Set(GeoPoint),
    Delete,
    Flush(oneshot::Sender<()>),
}

/// Turns raw samples into [`Fix`]es and keeps the last-known-location record current.
///
/// The record is cached in memory; writes go to a background task in submission order.
pub struct FixIngestor {
    store: Arc<dyn LocationStore>,
    writes: mpsc::UnboundedSender<StoreOp>,
    last_known: Option<GeoPoint>,
    next_sequence: u64,
}

impl FixIngestor {
    /// Must be called inside a tokio runtime: spawns the store writer.
    pub fn new(store: Arc<dyn LocationStore>) -> Self {
        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(persist(store.clone(), rx));
        Self {
            store,
            writes,
            last_known: None,
            next_sequence: 0,
        }
    }

    /// Loads the record left by a previous run into the cache.
    pub async fn restore(&mut self) -> Option<GeoPoint> {
        self.last_known = match self.store.get(LAST_KNOWN_FIX_KEY).await {
            Ok(point) => point.filter(|p| p.is_valid() && !p.is_unknown()),
            Err(err) => {
                tracing::warn!("failed to read last known location: {err}");
                None
            }
        };
        self.last_known
    }

    pub fn accept(&mut self, raw: &RawFix) -> Result<Fix, Rejection> {
        let point = normalize(raw)?;
        let fix = Fix {
            point,
            sequence: self.next_sequence,
            received_at: Utc::now(),
        };
        self.next_sequence += 1;

        self.last_known = Some(point);
        self.submit(StoreOp::Set(point));
        Ok(fix)
    }

    pub fn last_known(&self) -> Option<GeoPoint> {
        self.last_known
    }

    pub fn forget(&mut self) {
        self.last_known = None;
        self.submit(StoreOp::Delete);
    }

    /// Resolves once every write submitted so far reached the store.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.submit(StoreOp::Flush(done));
        let _ = wait.await;
    }

    fn submit(&self, op: StoreOp) {
        if self.writes.send(op).is_err() {
            tracing::warn!("location store writer is gone");
        }
    }
}

async fn persist(store: Arc<dyn LocationStore>, mut writes: mpsc::UnboundedReceiver<StoreOp>) {
    while let Some(op) = writes.recv().await {
        let result = match op {
            StoreOp::Set(point) => store.set(LAST_KNOWN_FIX_KEY, point).await,
            StoreOp::Delete => store.delete(LAST_KNOWN_FIX_KEY).await,
            StoreOp::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };
        if let Err(err) = result {
            tracing::warn!("failed to persist last known location: {err}");
        }
    }
}

fn normalize(raw: &RawFix) -> Result<GeoPoint, Rejection> {
    let (Some(lat), Some(lng)) = (raw.lat.as_ref(), raw.lng.as_ref()) else {
        return Err(Rejection::MissingCoordinate);
    };
    let (Some(lat), Some(lng)) = (lat.to_f64(), lng.to_f64()) else {
        return Err(Rejection::NotANumber);
    };
    if lat == 0.0 && lng == 0.0 {
        return Err(Rejection::NoData);
    }
    let point = GeoPoint::new(lat, lng);
    if !point.is_valid() {
        return Err(Rejection::OutOfRange);
    }
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::CoordinateValue, store::MemoryStore};

    fn ingestor() -> (FixIngestor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (FixIngestor::new(store.clone()), store)
    }

    #[tokio::test]
    async fn accepts_and_persists() {
        let (mut ingestor, store) = ingestor();
        let fix = ingestor.accept(&RawFix::from_numbers(12.97, 77.59)).unwrap();
        assert_eq!(fix.point, GeoPoint::new(12.97, 77.59));
        assert_eq!(ingestor.last_known(), Some(fix.point));

        ingestor.flush().await;
        assert_eq!(
            store.get(LAST_KNOWN_FIX_KEY).await.unwrap(),
            Some(GeoPoint::new(12.97, 77.59))
        );
    }

    #[tokio::test]
    async fn writes_land_in_order() {
        let (mut ingestor, store) = ingestor();
        ingestor.accept(&RawFix::from_numbers(1.0, 1.0)).unwrap();
        ingestor.forget();
        ingestor.accept(&RawFix::from_numbers(2.0, 2.0)).unwrap();

        ingestor.flush().await;
        assert_eq!(
            store.get(LAST_KNOWN_FIX_KEY).await.unwrap(),
            Some(GeoPoint::new(2.0, 2.0))
        );
    }

    #[tokio::test]
    async fn sequence_is_monotonic() {
        let (mut ingestor, _) = ingestor();
        let a = ingestor.accept(&RawFix::from_numbers(1.0, 1.0)).unwrap();
        let b = ingestor.accept(&RawFix::from_numbers(1.0, 1.0)).unwrap();
        assert!(b.sequence > a.sequence);
    }

    #[tokio::test]
    async fn zero_zero_is_no_data() {
        let (mut ingestor, store) = ingestor();
        assert_eq!(
            ingestor.accept(&RawFix::from_numbers(0.0, 0.0)),
            Err(Rejection::NoData)
        );
        ingestor.flush().await;
        assert_eq!(store.get(LAST_KNOWN_FIX_KEY).await.unwrap(), None);
        assert_eq!(ingestor.last_known(), None);
    }

    #[tokio::test]
    async fn single_zero_axis_is_a_real_position() {
        let (mut ingestor, _) = ingestor();
        assert!(ingestor.accept(&RawFix::from_numbers(0.0, 32.5)).is_ok());
    }

    #[tokio::test]
    async fn rejects_missing_and_garbage() {
        let (mut ingestor, _) = ingestor();
        let missing = RawFix {
            lat: Some(CoordinateValue::Number(1.0)),
            lng: None,
        };
        assert_eq!(ingestor.accept(&missing), Err(Rejection::MissingCoordinate));

        let garbage = RawFix {
            lat: Some(CoordinateValue::Text("north".into())),
            lng: Some(CoordinateValue::Number(1.0)),
        };
        assert_eq!(ingestor.accept(&garbage), Err(Rejection::NotANumber));
    }

    #[tokio::test]
    async fn rejects_out_of_range() {
        let (mut ingestor, _) = ingestor();
        assert_eq!(
            ingestor.accept(&RawFix::from_numbers(91.0, 10.0)),
            Err(Rejection::OutOfRange)
        );
    }

    #[tokio::test]
    async fn restore_ignores_sentinel_and_forget_clears() {
        let (mut ingestor, store) = ingestor();
        store.set(LAST_KNOWN_FIX_KEY, GeoPoint::UNKNOWN).await.unwrap();
        assert_eq!(ingestor.restore().await, None);

        store
            .set(LAST_KNOWN_FIX_KEY, GeoPoint::new(3.0, 4.0))
            .await
            .unwrap();
        assert_eq!(ingestor.restore().await, Some(GeoPoint::new(3.0, 4.0)));
        assert_eq!(ingestor.last_known(), Some(GeoPoint::new(3.0, 4.0)));

        ingestor.forget();
        assert_eq!(ingestor.last_known(), None);
        ingestor.flush().await;
        assert_eq!(store.get(LAST_KNOWN_FIX_KEY).await.unwrap(), None);
    }
}
