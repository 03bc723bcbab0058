//! Dispatcher: owns every component, exposes the command surface
//! consumed by UI/API layers, and runs the independent periodic tasks
//! (matching cycle, offer sweep, feed polling, metrics emission).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::bidding::{BidEvaluator, BidSubmitter, CostModel, RetryConfig};
use crate::error::{DispatchError, Result};
use crate::events::{DispatchEvent, EventBus};
use crate::feed::{BidGateway, LoadFeed, Notifier};
use crate::matching::{MatchQueue, MatchingEngine, OfferManager};
use crate::metrics::{MetricsSnapshot, MetricsTracker};
use crate::models::{CapacityStatus, CapacityUnit, EquipmentClass, GeoPoint, Load, LoadPosting, LoadSpec};
use crate::pricing::{demand_ratio, PricingConfig, RateCalculator};
use crate::registry::{FleetRegistry, LoadRegistry};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How often the matching cycle drains the queue
    pub match_interval: Duration,

    /// How often due offer deadlines are swept
    pub sweep_interval: Duration,

    /// How often the external feed is polled
    pub poll_interval: Duration,

    /// How often a metrics snapshot is published
    pub metrics_interval: Duration,

    /// Offer time-to-live in seconds
    pub offer_ttl_secs: i64,

    /// Evaluate postings but never auto-submit bids
    pub dry_run: bool,

    /// Broadcast channel capacity
    pub event_capacity: usize,

    pub pricing: PricingConfig,
    pub cost_model: CostModel,
    pub retry: RetryConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            match_interval: Duration::from_secs(5),
            sweep_interval: Duration::from_millis(500),
            poll_interval: Duration::from_secs(30),
            metrics_interval: Duration::from_secs(60),
            offer_ttl_secs: 300,
            dry_run: false,
            event_capacity: 256,
            pricing: PricingConfig::default(),
            cost_model: CostModel::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Owns the registries, matching engine, offer manager, and bidding
/// pipeline.
pub struct Dispatcher {
    config: DispatcherConfig,
    fleet: FleetRegistry,
    loads: LoadRegistry,
    queue: MatchQueue,
    events: EventBus,
    metrics: MetricsTracker,
    offers: OfferManager,
    engine: MatchingEngine,
    calculator: RateCalculator,
    evaluator: BidEvaluator,
    feed: Option<Arc<dyn LoadFeed>>,
    submitter: Option<BidSubmitter>,
    notifier: Arc<dyn Notifier>,
    shutdown: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, notifier: Arc<dyn Notifier>) -> Self {
        let fleet = FleetRegistry::new();
        let loads = LoadRegistry::new();
        let queue = MatchQueue::new();
        let events = EventBus::new(config.event_capacity);
        let metrics = MetricsTracker::new();

        let offers = OfferManager::new(
            fleet.clone(),
            loads.clone(),
            queue.clone(),
            events.clone(),
            metrics.clone(),
            chrono::Duration::seconds(config.offer_ttl_secs),
        );
        let engine = MatchingEngine::new(
            fleet.clone(),
            loads.clone(),
            offers.clone(),
            queue.clone(),
            metrics.clone(),
        );
        let calculator = RateCalculator::new(config.pricing.clone());
        let evaluator = BidEvaluator::new(fleet.clone(), metrics.clone(), config.cost_model.clone());

        Self {
            config,
            fleet,
            loads,
            queue,
            events,
            metrics,
            offers,
            engine,
            calculator,
            evaluator,
            feed: None,
            submitter: None,
            notifier,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach an external load board for posting evaluation and bids.
    pub fn attach_board(&mut self, feed: Arc<dyn LoadFeed>, gateway: Arc<dyn BidGateway>) {
        self.submitter = Some(BidSubmitter::new(
            gateway,
            self.loads.clone(),
            self.fleet.clone(),
            self.events.clone(),
            self.metrics.clone(),
            self.config.retry.clone(),
        ));
        self.feed = Some(feed);
    }

    /// Shutdown flag for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    // ==================== Commands ====================

    pub async fn register_unit(&self, unit: CapacityUnit) -> Result<()> {
        self.fleet.register(unit).await
    }

    pub async fn go_online(&self, capacity_id: &str) -> Result<()> {
        self.fleet.set_available(capacity_id).await
    }

    pub async fn go_offline(&self, capacity_id: &str) -> Result<()> {
        self.fleet.set_offline(capacity_id).await
    }

    pub async fn update_location(&self, capacity_id: &str, location: GeoPoint) -> Result<()> {
        self.fleet.update_location(capacity_id, location).await
    }

    /// Intake a new load, priced from the live supply/demand balance,
    /// and queue it for matching.
    pub async fn submit_load(&self, spec: LoadSpec) -> Result<Load> {
        spec.validate()?;

        let (_, available, _, _, _) = self.fleet.status_counts().await;
        let pending = self.loads.pending_count().await;
        let ratio = demand_ratio(available, pending);

        let distance = spec.origin.distance_miles(&spec.destination);
        let rate = self
            .calculator
            .price(spec.base_rate, distance, spec.urgency, ratio);

        let load = self.loads.submit(spec, rate).await?;
        self.queue.push_back(load.id.clone());
        self.events.publish(DispatchEvent::LoadCreated {
            load_id: load.id.clone(),
        });
        Ok(load)
    }

    pub async fn cancel_load(&self, load_id: &str) -> Result<()> {
        self.loads.cancel(load_id).await
    }

    pub async fn accept_offer(&self, load_id: &str, capacity_id: &str) -> Result<bool> {
        self.offers.accept(load_id, capacity_id, Utc::now()).await
    }

    pub async fn decline_offer(&self, load_id: &str, capacity_id: &str) -> Result<bool> {
        self.offers.decline(load_id, capacity_id, Utc::now()).await
    }

    pub async fn mark_in_transit(&self, load_id: &str) -> Result<()> {
        self.loads.mark_in_transit(load_id).await
    }

    /// Complete a load, releasing its unit back to the board.
    pub async fn mark_delivered(&self, load_id: &str) -> Result<()> {
        let load = self
            .loads
            .get(load_id)
            .await
            .ok_or_else(|| DispatchError::LoadNotFound(load_id.to_string()))?;
        self.loads.mark_delivered(load_id).await?;

        if let Some(capacity_id) = load.assigned_capacity {
            if let Err(e) = self
                .fleet
                .transition_from(&capacity_id, CapacityStatus::Assigned, CapacityStatus::Available)
                .await
            {
                warn!(capacity_id = %capacity_id, error = %e, "Unit release after delivery skipped");
            }
        }
        Ok(())
    }

    /// Fold a rating into the rated unit's running average.
    pub async fn rate_party(
        &self,
        rater_id: &str,
        rated_id: &str,
        score: f64,
        comment: Option<&str>,
    ) -> Result<f64> {
        let average = self.fleet.record_rating(rated_id, score).await?;
        info!(
            rater_id = %rater_id,
            rated_id = %rated_id,
            score = score,
            comment = comment.unwrap_or(""),
            "Rating recorded"
        );
        Ok(average)
    }

    /// Submit the latest recommended bid for a posting.
    pub async fn approve_bid(&self, posting_id: &str) -> Result<()> {
        let submitter = self
            .submitter
            .as_ref()
            .ok_or_else(|| DispatchError::validation("no bid gateway configured"))?;

        let (posting, evaluation) = self
            .evaluator
            .latest(posting_id)
            .await
            .ok_or_else(|| DispatchError::LoadNotFound(posting_id.to_string()))?;

        if !evaluation.should_bid || evaluation.recommended_bid <= Decimal::ZERO {
            return Err(DispatchError::validation(
                "latest evaluation does not recommend bidding",
            ));
        }
        let capacity_id = evaluation
            .best_candidate
            .clone()
            .ok_or_else(|| DispatchError::validation("no matched capacity for posting"))?;

        self.evaluator.forget(posting_id).await;
        submitter.spawn_submit(posting, capacity_id, evaluation.recommended_bid);
        Ok(())
    }

    // ==================== Queries ====================

    pub async fn available_capacity(&self, equipment: Option<EquipmentClass>) -> Vec<CapacityUnit> {
        self.fleet.query_available(equipment).await
    }

    pub async fn active_loads(&self) -> Vec<Load> {
        self.loads.active_loads().await
    }

    /// Loads with an outstanding offer awaiting accept/decline.
    pub async fn pending_offers(&self) -> Vec<Load> {
        self.loads.offered_loads().await
    }

    /// Latest bid recommendations awaiting approval or re-evaluation.
    pub async fn bid_recommendations(&self) -> Vec<crate::bidding::BidEvaluation> {
        self.evaluator.recommendations().await
    }

    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(&self.fleet, &self.loads).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    // ==================== Run loop ====================

    /// Run the periodic tasks until shutdown. Each task owns its own
    /// cadence; none blocks another.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            match_interval = ?self.config.match_interval,
            poll_interval = ?self.config.poll_interval,
            offer_ttl_secs = self.config.offer_ttl_secs,
            dry_run = self.config.dry_run,
            "Starting dispatcher"
        );

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        let mut tasks = Vec::new();

        // Matching cycle.
        {
            let engine = self.engine.clone();
            tasks.push(tokio::spawn(run_periodic(
                self.shutdown.clone(),
                self.config.match_interval,
                move || {
                    let engine = engine.clone();
                    async move {
                        engine.run_cycle(Utc::now()).await;
                    }
                },
            )));
        }

        // Offer deadline sweeper.
        {
            let offers = self.offers.clone();
            tasks.push(tokio::spawn(run_periodic(
                self.shutdown.clone(),
                self.config.sweep_interval,
                move || {
                    let offers = offers.clone();
                    async move {
                        offers.sweep_due(Utc::now()).await;
                    }
                },
            )));
        }

        // Feed polling, evaluation, and pruning.
        if let (Some(feed), Some(submitter)) = (self.feed.clone(), self.submitter.clone()) {
            let evaluator = self.evaluator.clone();
            let events = self.events.clone();
            let dry_run = self.config.dry_run;
            tasks.push(tokio::spawn(run_periodic(
                self.shutdown.clone(),
                self.config.poll_interval,
                move || {
                    let feed = feed.clone();
                    let submitter = submitter.clone();
                    let evaluator = evaluator.clone();
                    let events = events.clone();
                    async move {
                        let now = Utc::now();
                        match feed.poll_postings().await {
                            Ok(postings) => {
                                debug!(count = postings.len(), "Feed poll");
                                for posting in postings {
                                    process_posting(
                                        &evaluator, &submitter, &events, dry_run, posting, now,
                                    )
                                    .await;
                                }
                            }
                            Err(e) => warn!(error = %e, "Feed poll failed"),
                        }

                        let pruned = evaluator.prune_stale(now).await;
                        if pruned > 0 {
                            debug!(pruned = pruned, "Dropped stale postings");
                        }
                    }
                },
            )));
        }

        // Metrics emission.
        {
            let metrics = self.metrics.clone();
            let fleet = self.fleet.clone();
            let loads = self.loads.clone();
            let events = self.events.clone();
            tasks.push(tokio::spawn(run_periodic(
                self.shutdown.clone(),
                self.config.metrics_interval,
                move || {
                    let metrics = metrics.clone();
                    let fleet = fleet.clone();
                    let loads = loads.clone();
                    let events = events.clone();
                    async move {
                        let snapshot = metrics.snapshot(&fleet, &loads).await;
                        events.publish(DispatchEvent::MetricsUpdated(snapshot));
                    }
                },
            )));
        }

        // Notification forwarding.
        {
            let mut rx = self.events.subscribe();
            let notifier = self.notifier.clone();
            let shutdown = self.shutdown.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
                        Ok(Ok(event)) => forward_notification(notifier.as_ref(), &event),
                        Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                            warn!(skipped = skipped, "Notification stream lagged");
                        }
                        Ok(Err(broadcast::error::RecvError::Closed)) => break,
                        Err(_) => {
                            if shutdown.load(Ordering::SeqCst) {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        join_all(tasks).await;
        info!("Dispatcher stopped");
        Ok(())
    }
}

/// How often a sleeping periodic task re-checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Drive `work` on a fixed cadence until the shutdown flag is set. The
/// flag is polled between ticks so long cadences still stop promptly.
async fn run_periodic<F, Fut>(shutdown: Arc<AtomicBool>, every: Duration, mut work: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                work().await;
            }
            _ = tokio::time::sleep(SHUTDOWN_POLL) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
    }
}

/// Evaluate one posting and either hand it to the submitter or surface
/// it for manual approval.
async fn process_posting(
    evaluator: &BidEvaluator,
    submitter: &BidSubmitter,
    events: &EventBus,
    dry_run: bool,
    posting: LoadPosting,
    now: DateTime<Utc>,
) {
    if posting.is_stale(now) {
        debug!(posting_id = %posting.id, "Skipping stale posting");
        return;
    }

    let evaluation = evaluator.evaluate(&posting, now).await;
    if !evaluation.should_bid {
        debug!(
            posting_id = %posting.id,
            confidence = evaluation.confidence,
            "Not bidding"
        );
        return;
    }
    let Some(capacity_id) = evaluation.best_candidate.clone() else {
        return;
    };

    let threshold = evaluator.policy(posting.source).auto_submit_threshold;
    if evaluation.confidence >= threshold && !dry_run {
        evaluator.forget(&posting.id).await;
        submitter.spawn_submit(posting, capacity_id, evaluation.recommended_bid);
    } else {
        events.publish(DispatchEvent::BidRecommended {
            posting_id: posting.id.clone(),
            amount: evaluation.recommended_bid,
            confidence: evaluation.confidence,
        });
    }
}

/// Driver-facing notifications for offer lifecycle events.
fn forward_notification(notifier: &dyn Notifier, event: &DispatchEvent) {
    match event {
        DispatchEvent::LoadOffered {
            load_id,
            capacity_id,
            expires_at,
            ..
        } => notifier.notify(
            capacity_id,
            &format!("New load offer {load_id}, respond by {expires_at}"),
        ),
        DispatchEvent::LoadAccepted {
            load_id,
            capacity_id,
        } => notifier.notify(capacity_id, &format!("Load {load_id} confirmed")),
        DispatchEvent::OfferExpired {
            load_id,
            capacity_id,
        } => notifier.notify(capacity_id, &format!("Offer on load {load_id} expired")),
        _ => {}
    }
}
