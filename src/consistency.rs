//! Eventual-consistency polling for mutating Directory API calls.
//!
//! Writes to the Admin SDK are not immediately visible to subsequent reads:
//! a `GET` issued right after an `insert` may be served by a replica that has
//! not seen the write yet, or may 404 outright. Every create/update therefore
//! ends with a short polling loop that re-fetches the object with
//! `If-None-Match: <last etag>` until the ETag stops moving.
//!
//! [`ConsistencyTracker`] holds the observations for one operation and owns the
//! settlement predicate. [`ConsistencyPoller`] drives the probe, sleeps between
//! attempts and enforces the tracker's time budget.
//!
//! ```ignore
//! let mut tracker = ConsistencyTracker::new("user", Duration::from_secs(300));
//! ConsistencyPoller::new(PollOptions::default())
//!     .poll_until_consistent(&mut tracker, 2, |etag| {
//!         let client = Arc::clone(&client);
//!         let path = path.clone();
//!         async move { client.probe_etag(Service::Directory, &path, &etag).await }
//!     })
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::ApiError;
use crate::error::ProviderError;

/// Stable reads required, together with enough observed transitions, before a
/// write is considered visible.
const STABLE_READS_WITH_TRANSITIONS: u32 = 2;

/// Stable reads that settle the loop on their own, for writes whose resulting
/// tag was embedded in our own response and never observed as a transition.
const STABLE_READS_UNCONDITIONAL: u32 = 3;

/// Rolling ETag observations for a single create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyTracker {
    resource_kind: String,
    timeout: Duration,
    last_observed_tag: String,
    distinct_tag_transitions: u32,
    consecutive_stable_reads: u32,
}

impl ConsistencyTracker {
    /// Create an empty tracker for one mutating operation.
    pub fn new(resource_kind: impl Into<String>, timeout: Duration) -> Self {
        Self {
            resource_kind: resource_kind.into(),
            timeout,
            last_observed_tag: String::new(),
            distinct_tag_transitions: 0,
            consecutive_stable_reads: 0,
        }
    }

    /// Label used in log lines and the timeout error.
    pub fn resource_kind(&self) -> &str {
        &self.resource_kind
    }

    /// Total wall-clock budget for polling.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The most recently observed tag, empty before the first observation.
    pub fn last_observed_tag(&self) -> &str {
        &self.last_observed_tag
    }

    /// Number of times the observed tag changed value.
    pub fn distinct_tag_transitions(&self) -> u32 {
        self.distinct_tag_transitions
    }

    /// Number of consecutive "not modified" reads since the last transition.
    pub fn consecutive_stable_reads(&self) -> u32 {
        self.consecutive_stable_reads
    }

    /// A conditional fetch reported that `last_observed_tag` is still current.
    pub fn record_unchanged(&mut self) {
        self.consecutive_stable_reads += 1;
    }

    /// A fetch returned a representation carrying `tag`.
    pub fn record_observed_tag(&mut self, tag: &str) {
        if tag != self.last_observed_tag {
            self.last_observed_tag = tag.to_string();
            self.distinct_tag_transitions += 1;
            self.consecutive_stable_reads = 0;
        }
    }

    /// Whether the observations so far are enough to treat `expected_write_count`
    /// writes as visible.
    pub fn has_reached_consistency(&self, expected_write_count: u32) -> bool {
        (self.distinct_tag_transitions >= expected_write_count
            && self.consecutive_stable_reads >= STABLE_READS_WITH_TRANSITIONS)
            || self.consecutive_stable_reads >= STABLE_READS_UNCONDITIONAL
    }
}

/// How a failed fetch should be treated by the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorClass {
    /// The conditional fetch matched the last tag (HTTP 304).
    NotModified,
    /// The object is not visible yet (HTTP 404); keep polling.
    NotFound,
    /// Anything else; abort the loop.
    Fatal,
}

/// Classify an error returned by a probe fetch.
pub fn classify_fetch_error(err: &ApiError) -> FetchErrorClass {
    if err.is_not_modified() {
        FetchErrorClass::NotModified
    } else if err.is_not_found() {
        FetchErrorClass::NotFound
    } else {
        FetchErrorClass::Fatal
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// The tag sent as `If-None-Match` is still current.
    Unchanged,
    /// The object was returned with this tag.
    Changed(String),
    /// The object could not be located yet.
    NotFound,
}

impl Probe {
    /// Turn the result of a conditional fetch (yielding the object's tag) into
    /// a probe outcome. Fatal fetch errors are returned as `Err`.
    pub fn from_fetch(result: Result<String, ApiError>) -> Result<Probe, ProviderError> {
        match result {
            Ok(tag) => Ok(Probe::Changed(tag)),
            Err(err) => match classify_fetch_error(&err) {
                FetchErrorClass::NotModified => Ok(Probe::Unchanged),
                FetchErrorClass::NotFound => Ok(Probe::NotFound),
                FetchErrorClass::Fatal => Err(err.into()),
            },
        }
    }
}

/// Sleep schedule between probes.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    /// Delay before the second probe.
    pub initial_interval: Duration,
    /// Upper bound on any single delay.
    pub max_interval: Duration,
    /// Growth factor applied after every probe.
    pub multiplier: f64,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl PollOptions {
    /// Set the first delay.
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum delay.
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Drives a probe until a [`ConsistencyTracker`] reports settlement.
#[derive(Debug, Clone)]
pub struct ConsistencyPoller {
    options: PollOptions,
    stop: Option<watch::Receiver<bool>>,
}

impl ConsistencyPoller {
    /// Create a poller with the given sleep schedule.
    pub fn new(options: PollOptions) -> Self {
        Self {
            options,
            stop: None,
        }
    }

    /// Interrupt polling when `stop` becomes `true`.
    pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Poll until `tracker` considers `expected_write_count` writes visible.
    ///
    /// `probe` receives the last observed tag (empty on the first call) and
    /// performs one conditional fetch. The loop runs inline, never issues
    /// concurrent probes, and gives up with
    /// [`ProviderError::DeadlineExceeded`] once the tracker's timeout has
    /// elapsed. A probe error aborts immediately.
    pub async fn poll_until_consistent<F, Fut>(
        &self,
        tracker: &mut ConsistencyTracker,
        expected_write_count: u32,
        mut probe: F,
    ) -> Result<(), ProviderError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<Probe, ProviderError>>,
    {
        let deadline = Instant::now() + tracker.timeout();
        let mut backoff = self.options.backoff();
        let mut stop = self.stop.clone();

        loop {
            if tracker.has_reached_consistency(expected_write_count) {
                debug!(
                    resource_kind = %tracker.resource_kind(),
                    transitions = tracker.distinct_tag_transitions(),
                    stable_reads = tracker.consecutive_stable_reads(),
                    "Reached consistency"
                );
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(timed_out(tracker));
            }

            let last_tag = tracker.last_observed_tag().to_string();
            let outcome = match tokio::time::timeout_at(deadline, probe(last_tag)).await {
                Ok(outcome) => outcome?,
                Err(_) => return Err(timed_out(tracker)),
            };

            match outcome {
                Probe::Unchanged => tracker.record_unchanged(),
                Probe::Changed(tag) => tracker.record_observed_tag(&tag),
                Probe::NotFound => {
                    debug!(resource_kind = %tracker.resource_kind(), "Not visible yet, retrying");
                }
            }

            debug!(
                resource_kind = %tracker.resource_kind(),
                etag = %tracker.last_observed_tag(),
                transitions = tracker.distinct_tag_transitions(),
                stable_reads = tracker.consecutive_stable_reads(),
                "Consistency probe"
            );

            if tracker.has_reached_consistency(expected_write_count) {
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let delay = backoff
                .next_backoff()
                .unwrap_or(self.options.max_interval)
                .min(remaining);

            match stop.as_mut() {
                Some(stop) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        Ok(_) = stop.wait_for(|stopped| *stopped) => {
                            return Err(ProviderError::Cancelled(format!(
                                "provider stopped while waiting for {} to become consistent",
                                tracker.resource_kind()
                            )));
                        }
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}

impl Default for ConsistencyPoller {
    fn default() -> Self {
        Self::new(PollOptions::default())
    }
}

fn timed_out(tracker: &ConsistencyTracker) -> ProviderError {
    warn!(
        resource_kind = %tracker.resource_kind(),
        timeout = ?tracker.timeout(),
        transitions = tracker.distinct_tag_transitions(),
        stable_reads = tracker.consecutive_stable_reads(),
        "Timed out waiting for consistency"
    );
    ProviderError::DeadlineExceeded(format!(
        "timed out after {:?} while waiting for {} to reach a consistent state",
        tracker.timeout(),
        tracker.resource_kind()
    ))
}

/// Poll with a fresh tracker and the default schedule.
pub async fn poll_until_consistent<F, Fut>(
    resource_kind: &str,
    timeout: Duration,
    expected_write_count: u32,
    probe: F,
) -> Result<(), ProviderError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Probe, ProviderError>>,
{
    let mut tracker = ConsistencyTracker::new(resource_kind, timeout);
    ConsistencyPoller::default()
        .poll_until_consistent(&mut tracker, expected_write_count, probe)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn tracker() -> ConsistencyTracker {
        ConsistencyTracker::new("user", Duration::from_secs(60))
    }

    /// A probe that replays canned outcomes and records the tags it was given.
    #[derive(Clone, Default)]
    struct Script {
        outcomes: Arc<Mutex<VecDeque<Result<Probe, ProviderError>>>>,
        seen_tags: Arc<Mutex<Vec<String>>>,
    }

    impl Script {
        fn new(outcomes: Vec<Result<Probe, ProviderError>>) -> Self {
            Self {
                outcomes: Arc::new(Mutex::new(outcomes.into())),
                seen_tags: Arc::default(),
            }
        }

        fn probe(&self) -> impl FnMut(String) -> std::future::Ready<Result<Probe, ProviderError>> {
            let script = self.clone();
            move |tag| {
                script.seen_tags.lock().unwrap().push(tag);
                let next = script
                    .outcomes
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or(Ok(Probe::Unchanged));
                std::future::ready(next)
            }
        }

        fn calls(&self) -> usize {
            self.seen_tags.lock().unwrap().len()
        }
    }

    #[test]
    fn test_distinct_tags_count_transitions() {
        let mut t = tracker();
        for tag in ["a", "b", "c", "d"] {
            t.record_observed_tag(tag);
        }
        assert_eq!(t.distinct_tag_transitions(), 4);
        assert_eq!(t.consecutive_stable_reads(), 0);
        assert_eq!(t.last_observed_tag(), "d");
    }

    #[test]
    fn test_unchanged_reads_accumulate() {
        let mut t = tracker();
        t.record_observed_tag("etag-1");
        for _ in 0..5 {
            t.record_unchanged();
        }
        assert_eq!(t.consecutive_stable_reads(), 5);
        assert_eq!(t.distinct_tag_transitions(), 1);
    }

    #[test]
    fn test_same_tag_is_noop() {
        let mut t = tracker();
        t.record_observed_tag("etag-1");
        t.record_unchanged();
        t.record_observed_tag("etag-1");
        assert_eq!(t.distinct_tag_transitions(), 1);
        assert_eq!(t.consecutive_stable_reads(), 1);
    }

    #[test]
    fn test_transition_resets_stable_reads() {
        let mut t = tracker();
        t.record_observed_tag("etag-1");
        t.record_unchanged();
        t.record_unchanged();
        t.record_observed_tag("etag-2");
        assert_eq!(t.consecutive_stable_reads(), 0);
        assert_eq!(t.distinct_tag_transitions(), 2);
    }

    #[test]
    fn test_predicate_needs_transitions_or_long_streak() {
        let mut t = tracker();
        t.record_observed_tag("etag-1");
        t.record_unchanged();
        assert!(!t.has_reached_consistency(3));

        t.record_unchanged();
        assert_eq!(t.consecutive_stable_reads(), 2);
        assert!(!t.has_reached_consistency(3));

        t.record_unchanged();
        assert!(t.has_reached_consistency(3));
    }

    #[test]
    fn test_single_write_settles_after_two_stable_reads() {
        let mut t = tracker();
        t.record_observed_tag("etag-A");
        assert!(!t.has_reached_consistency(1));
        t.record_unchanged();
        assert!(!t.has_reached_consistency(1));
        t.record_unchanged();
        assert!(t.has_reached_consistency(1));
    }

    #[test]
    fn test_long_streak_overrides_transition_count() {
        let mut t = tracker();
        t.record_observed_tag("A");
        t.record_observed_tag("B");
        for _ in 0..3 {
            t.record_unchanged();
        }
        assert_eq!(t.distinct_tag_transitions(), 2);
        assert!(t.has_reached_consistency(5));
    }

    #[test]
    fn test_fresh_tracker_is_not_consistent() {
        assert!(!tracker().has_reached_consistency(0));
    }

    #[test]
    fn test_classify_fetch_error() {
        assert_eq!(
            classify_fetch_error(&ApiError::NotModified),
            FetchErrorClass::NotModified
        );
        assert_eq!(
            classify_fetch_error(&ApiError::http(404, "Resource Not Found: groupKey")),
            FetchErrorClass::NotFound
        );
        assert_eq!(
            classify_fetch_error(&ApiError::http(403, "Not Authorized")),
            FetchErrorClass::Fatal
        );
        assert_eq!(
            classify_fetch_error(&ApiError::http(500, "Backend Error")),
            FetchErrorClass::Fatal
        );
    }

    #[test]
    fn test_fetch_outcome_classification() {
        assert_eq!(
            Probe::from_fetch(Ok("etag-1".into())).unwrap(),
            Probe::Changed("etag-1".into())
        );
        assert_eq!(
            Probe::from_fetch(Err(ApiError::NotModified)).unwrap(),
            Probe::Unchanged
        );
        assert_eq!(
            Probe::from_fetch(Err(ApiError::http(404, "gone"))).unwrap(),
            Probe::NotFound
        );
        assert!(matches!(
            Probe::from_fetch(Err(ApiError::http(401, "Login Required"))),
            Err(ProviderError::PermissionDenied(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_without_probing_when_already_consistent() {
        let mut t = tracker();
        t.record_observed_tag("etag-1");
        t.record_unchanged();
        t.record_unchanged();

        let script = Script::new(vec![]);
        ConsistencyPoller::default()
            .poll_until_consistent(&mut t, 1, script.probe())
            .await
            .unwrap();
        assert_eq!(script.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_settles_after_stable_reads() {
        let script = Script::new(vec![
            Ok(Probe::NotFound),
            Ok(Probe::Changed("etag-1".into())),
            Ok(Probe::Unchanged),
            Ok(Probe::Unchanged),
        ]);
        let mut t = tracker();
        ConsistencyPoller::default()
            .poll_until_consistent(&mut t, 1, script.probe())
            .await
            .unwrap();

        assert_eq!(script.calls(), 4);
        assert_eq!(
            *script.seen_tags.lock().unwrap(),
            vec!["", "", "etag-1", "etag-1"]
        );
        assert_eq!(t.distinct_tag_transitions(), 1);
        assert_eq!(t.consecutive_stable_reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_waits_for_expected_writes() {
        let script = Script::new(vec![
            Ok(Probe::Changed("etag-1".into())),
            Ok(Probe::Unchanged),
            Ok(Probe::Changed("etag-2".into())),
            Ok(Probe::Unchanged),
            Ok(Probe::Unchanged),
        ]);
        let mut t = tracker();
        ConsistencyPoller::default()
            .poll_until_consistent(&mut t, 2, script.probe())
            .await
            .unwrap();

        assert_eq!(script.calls(), 5);
        assert_eq!(t.last_observed_tag(), "etag-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_when_tag_keeps_moving() {
        let counter = Arc::new(Mutex::new(0u32));
        let probe = {
            let counter = Arc::clone(&counter);
            move |_tag: String| {
                let mut n = counter.lock().unwrap();
                *n += 1;
                std::future::ready(Ok(Probe::Changed(format!("etag-{}", n))))
            }
        };

        let mut t = ConsistencyTracker::new("group", Duration::from_secs(30));
        let err = ConsistencyPoller::default()
            .poll_until_consistent(&mut t, 1, probe)
            .await
            .unwrap_err();

        match err {
            ProviderError::DeadlineExceeded(msg) => assert!(msg.contains("group")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(*counter.lock().unwrap() > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_while_resource_is_missing() {
        let script = Script::new((0..1000).map(|_| Ok(Probe::NotFound)).collect());
        let mut t = ConsistencyTracker::new("org_unit", Duration::from_secs(5));
        let err = ConsistencyPoller::default()
            .poll_until_consistent(&mut t, 1, script.probe())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::DeadlineExceeded(_)));
        assert_eq!(t.distinct_tag_transitions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_aborts_on_hard_error() {
        let script = Script::new(vec![Err(ProviderError::PermissionDenied(
            "Not Authorized to access this resource/api".into(),
        ))]);
        let mut t = tracker();
        let started = Instant::now();
        let err = ConsistencyPoller::default()
            .poll_until_consistent(&mut t, 1, script.probe())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::PermissionDenied(_)));
        assert_eq!(script.calls(), 1);
        assert_eq!(Instant::now(), started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_when_signalled() {
        let (tx, rx) = watch::channel(false);
        let probe = |_tag: String| std::future::ready(Ok(Probe::NotFound));
        let mut t = ConsistencyTracker::new("user", Duration::from_secs(600));

        let poller = ConsistencyPoller::default().with_stop_signal(rx);
        let handle = tokio::spawn(async move {
            poller.poll_until_consistent(&mut t, 1, probe).await
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_parks_between_checks_until_stopped() {
        let (tx, rx) = watch::channel(false);
        let script = Script::new(vec![Ok(Probe::Changed("etag-1".into()))]);
        let poller = ConsistencyPoller::default().with_stop_signal(rx);
        let mut t = ConsistencyTracker::new("group", Duration::from_secs(60));

        let mut poll =
            tokio_test::task::spawn(poller.poll_until_consistent(&mut t, 1, script.probe()));
        tokio_test::assert_pending!(poll.poll());
        assert_eq!(script.calls(), 1);

        tx.send(true).unwrap();
        assert!(poll.is_woken());
        let err = tokio_test::assert_ready_err!(poll.poll());
        assert!(matches!(err, ProviderError::Cancelled(_)));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_function_uses_fresh_tracker() {
        let script = Script::new(vec![
            Ok(Probe::Changed("etag-1".into())),
            Ok(Probe::Unchanged),
            Ok(Probe::Unchanged),
        ]);
        poll_until_consistent("domain", Duration::from_secs(60), 1, script.probe())
            .await
            .unwrap();
        assert_eq!(script.calls(), 3);
    }
}
