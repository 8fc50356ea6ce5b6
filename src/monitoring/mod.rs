/*!
 * Monitoring
 * Tracing setup and scheduler statistics reporting
 */

mod reporter;
mod tracer;

pub use reporter::{ReportFormat, StatsReporter};
pub use tracer::{init_tracing, SessionSpan};
