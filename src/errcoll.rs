use log::error;
use prometheus::IntCounter;

pub trait ErrorCollector: Send + Sync {
    fn collect(&self, err: anyhow::Error);
}

pub struct LogErrorCollector {
    errors: Option<IntCounter>,
}

impl LogErrorCollector {
    pub fn new(errors: Option<IntCounter>) -> Self {
        Self { errors }
    }
}

impl ErrorCollector for LogErrorCollector {
    fn collect(&self, err: anyhow::Error) {
        error!("Collected error: {:#}", err);
        if let Some(errors) = &self.errors {
            errors.inc();
        }
    }
}
