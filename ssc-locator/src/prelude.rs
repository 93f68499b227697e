//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::config::SlidingConfig;
pub use crate::consts::{DIAGNOSTIC_SAMPLES, LEVEL_COUNT, LEVEL_HEADERS};
pub use crate::data::{NiftiAccessor, Sample, Volume, VolumeAccessor};
pub use crate::dataset::{full_sample_loader, LandmarkTable};
pub use crate::device::{Device, NvidiaSmiProbe, UtilizationProbe};
pub use crate::emit::{CsvEmitter, Mode, ResultPaths, ResultSink};
pub use crate::error::{EvalError, LocateError};
pub use crate::eval::{Evaluator, LevelRecord, SampleRecord};
pub use crate::prior::{PriorPredictions, RefinedAccessor};
pub use crate::reconcile::{reconcile, AggregatedResult, PredictionBatch, Reconciler};
pub use crate::scorer::{PatchScorer, ScorerInput};
pub use crate::sliding::{SlidingWindows, StartBatches, WindowBatch};
pub use crate::{Level, LevelSelection};
