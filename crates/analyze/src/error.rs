/// Reasons the analyzer gives up on a single callable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisFault {
    #[error("nesting deeper than {limit} levels, analysis of this callable is incomplete")]
    NestingTooDeep { limit: usize },

    #[error("internal analyzer error: {0}")]
    Panicked(String),
}
