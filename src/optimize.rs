//! Optimizer integration seam.
//!
//! Some hosts run an external compressor over freshly generated
//! derivatives. Those compressors usually track which sizes they are
//! allowed to touch, so generating a size behind their back leaves it
//! permanently uncompressed. The engine drives implementations through a
//! narrow mark, run, clear sequence right after rendering a derivative.
//!
//! Every call in that sequence is best-effort from the engine's point of
//! view: a failing optimizer must never withhold an already rendered
//! file.

use crate::error::EngineError;
use crate::repo::AssetId;

/// Hook for an external derivative compressor.
///
/// The engine calls [`mark_eligible`](Self::mark_eligible) before the
/// run so the size under generation is inside the compressor's allow
/// list, then [`optimize`](Self::optimize), then
/// [`clear_eligible`](Self::clear_eligible). The clear call runs even
/// when the run fails, so a transient failure cannot widen the allow
/// list for good.
pub trait DerivativeOptimizer: Send + Sync {
    /// Admit one size of one asset into the compressor's allow list.
    fn mark_eligible(&self, asset_id: AssetId, size_name: &str) -> Result<(), EngineError>;

    /// Run the compressor over the asset's current derivatives.
    fn optimize(&self, asset_id: AssetId) -> Result<(), EngineError>;

    /// Remove the size from the allow list again.
    fn clear_eligible(&self, asset_id: AssetId, size_name: &str) -> Result<(), EngineError>;
}
