//! Shared state handed to every handler.

use std::sync::Arc;

use queryrelay_executor::{QueryRunner, SessionFactory};
use queryrelay_log::Logger;
use queryrelay_scheduler::Scheduler;

pub struct ApiState<F: SessionFactory, Q: QueryRunner> {
    pub scheduler: Scheduler<F, Q>,
    pub logger: Arc<Logger>,
}

impl<F: SessionFactory, Q: QueryRunner> Clone for ApiState<F, Q> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            logger: self.logger.clone(),
        }
    }
}

impl<F: SessionFactory, Q: QueryRunner> ApiState<F, Q> {
    pub fn new(scheduler: Scheduler<F, Q>, logger: Arc<Logger>) -> Self {
        Self { scheduler, logger }
    }
}
