use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::expression::{next_after, parse_schedule};
use super::error::{ScheduleError, SyncError};
use super::sync::{SyncReport, SyncRunner};
use crate::ledger::Product;

struct Registration {
    expression: String,
    schedule: Schedule,
    task: JoinHandle<()>,
}

/// One recurring trigger per scheduled product, keyed by product id
pub struct Scheduler {
    runner: Arc<SyncRunner>,
    registrations: Mutex<HashMap<String, Registration>>,
}

impl Scheduler {
    pub fn new(runner: Arc<SyncRunner>) -> Self {
        Self {
            runner,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Install every auto-download product with a schedule. Invalid
    /// expressions are logged and skipped; returns the number installed.
    pub fn start(&self) -> Result<usize, ScheduleError> {
        let products = self.runner.store().scheduled_products()?;
        let mut installed = 0;
        for product in &products {
            match self.schedule_product(product) {
                Ok(()) => installed += 1,
                Err(e) => error!(product_id = %product.id, error = %e, "Failed to schedule product"),
            }
        }
        info!(installed, candidates = products.len(), "Loaded product schedules");
        Ok(installed)
    }

    /// Replace any registration for the product with one for its current
    /// expression. An empty expression just removes the registration.
    pub fn schedule_product(&self, product: &Product) -> Result<(), ScheduleError> {
        let mut registrations = self.lock();

        if let Some(old) = registrations.remove(&product.id) {
            old.task.abort();
            debug!(product_id = %product.id, expression = %old.expression, "Removed schedule");
        }

        if !product.is_scheduled() {
            return Ok(());
        }

        let schedule = parse_schedule(&product.schedule)?;
        let task = tokio::spawn(run_trigger(
            product.id.clone(),
            schedule.clone(),
            self.runner.clone(),
        ));

        registrations.insert(
            product.id.clone(),
            Registration {
                expression: product.schedule.trim().to_string(),
                schedule,
                task,
            },
        );
        info!(product_id = %product.id, schedule = %product.schedule, "Scheduled product");
        Ok(())
    }

    pub fn unschedule_product(&self, product_id: &str) {
        if let Some(old) = self.lock().remove(product_id) {
            old.task.abort();
            info!(product_id, "Unscheduled product");
        }
    }

    pub fn next_run(&self, product_id: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .get(product_id)
            .and_then(|r| next_after(&r.schedule, &Utc::now()))
    }

    pub fn registered_expression(&self, product_id: &str) -> Option<String> {
        self.lock().get(product_id).map(|r| r.expression.clone())
    }

    pub fn registration_count(&self) -> usize {
        self.lock().len()
    }

    /// Run a sync out of band without waiting for it
    pub fn sync_now(&self, product_id: &str) -> Result<(), ScheduleError> {
        if self.runner.store().get_product(product_id)?.is_none() {
            return Err(ScheduleError::ProductNotFound(product_id.to_string()));
        }
        let runner = self.runner.clone();
        let product_id = product_id.to_string();
        tokio::spawn(async move { run_logged(&runner, &product_id).await });
        Ok(())
    }

    /// Run a sync and wait for its report
    pub async fn sync_product(&self, product_id: &str) -> Result<SyncReport, SyncError> {
        self.runner.sync_product(product_id).await
    }

    /// Abort every trigger task
    pub fn shutdown(&self) {
        let mut registrations = self.lock();
        for (_, registration) in registrations.drain() {
            registration.task.abort();
        }
        info!("Scheduler stopped");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let registrations = self
            .registrations
            .get_mut()
            .unwrap_or_else(|e| e.into_inner());
        for (_, registration) in registrations.drain() {
            registration.task.abort();
        }
    }
}

async fn run_trigger(product_id: String, schedule: Schedule, runner: Arc<SyncRunner>) {
    let mut after = Utc::now();
    loop {
        let Some(next) = next_after(&schedule, &after) else {
            warn!(product_id = %product_id, "Schedule has no upcoming fire time");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        after = next;

        let runner = runner.clone();
        let product_id = product_id.clone();
        tokio::spawn(async move { run_logged(&runner, &product_id).await });
    }
}

async fn run_logged(runner: &SyncRunner, product_id: &str) {
    match runner.sync_product(product_id).await {
        Ok(_) | Err(SyncError::AlreadyRunning(_)) => {}
        Err(e) => warn!(product_id, error = %e, "Sync did not complete"),
    }
}
