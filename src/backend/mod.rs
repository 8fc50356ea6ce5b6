/*!
 * Kernel Backend
 * The kernel side of an extension session
 *
 * The loader and attachment layer only talk to `KernelBackend`. The simulated
 * kernel implements it in-process and owns a scheduling class that struct-ops
 * schedulers are installed into.
 */

pub mod simulation;
pub mod traits;
pub mod types;

pub use simulation::{ReleaseEvent, SimulationBackend};
pub use traits::KernelBackend;
pub use types::*;
