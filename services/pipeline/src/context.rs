use warehouse::Warehouse;

/// Everything a stage needs: the storage handle and the run mode.
///
/// One context is created per invocation and passed to each stage in turn.
/// [`PipelineContext::close`] must be called on every exit path.
pub struct PipelineContext {
    warehouse: Box<dyn Warehouse>,
    dry_run: bool,
}

impl PipelineContext {
    pub fn new(warehouse: impl Warehouse + 'static) -> Self {
        Self {
            warehouse: Box::new(warehouse),
            dry_run: false,
        }
    }

    /// In dry-run mode stages compute their reports but write nothing.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn warehouse(&self) -> &dyn Warehouse {
        self.warehouse.as_ref()
    }

    pub async fn close(self) {
        self.warehouse.close().await;
    }
}
