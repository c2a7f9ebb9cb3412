use std::fmt;

/// Phases reported while fitting a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FitProgressStage {
    Initialization,
    GramMatrix,
    ProductAccumulation,
    RowSolve,
    Recovery,
}

impl FitProgressStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Initialization => "initial factor solve",
            Self::GramMatrix => "Gram matrix accumulation",
            Self::ProductAccumulation => "A'X accumulation",
            Self::RowSolve => "row-wise X update",
            Self::Recovery => "principal direction recovery",
        }
    }
}

impl fmt::Display for FitProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Summary of one completed outer iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IterationReport {
    pub iteration: usize,
    pub residual: f64,
    pub objective: f64,
    pub avg_change_obj: f64,
}

/// Observer for reporting incremental progress while fitting a model.
pub trait FitProgressObserver: Send + Sync {
    fn on_stage_start(&self, stage: FitProgressStage, iteration: usize) {
        let _ = (stage, iteration);
    }
    fn on_stage_finish(&self, stage: FitProgressStage, iteration: usize) {
        let _ = (stage, iteration);
    }
    fn on_iteration(&self, report: &IterationReport) {
        let _ = report;
    }
}

#[derive(Default)]
pub struct NoopFitProgress;

impl FitProgressObserver for NoopFitProgress {}
