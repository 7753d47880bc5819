//! Temporally coherent rotoscoping effect.
//!
//! The look: bold dark edges over flat quantized color, held steady
//! across frames. Edges come from a HED model run through ONNX Runtime
//! (with a Sobel fallback when the model cannot load), colors from
//! CIELAB quantization, and frame-to-frame coherence from explicit
//! state plus block-matching optical flow.
//!
//! The engine is synchronous and CPU-bound; callers decide where it
//! runs.

pub mod edge;
pub mod engine;
pub mod error;
pub mod flow;
pub mod ops;
pub mod quantize;
pub mod state;

pub use edge::{load_edge_model, EdgeModel, HedModel, SobelModel};
pub use engine::{build_engine, ScannerDarklyEngine};
pub use error::{EffectError, EffectResult};
pub use state::EffectState;
