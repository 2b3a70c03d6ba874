//! Quality-control bookkeeping for a BIDS dataset and its fMRIPrep outputs.
//!
//! Four independent checks each produce a subject-keyed table:
//!
//! - [`presence`]: which raw datatypes (`anat`, `func`, `fmap`) exist per subject
//! - [`completion`]: whether fMRIPrep wrote the subject's HTML report
//! - [`jobs`]: how far the scheduler job got, judged by log size
//! - [`motion`]: per-task framewise-displacement outliers
//!
//! [`summary`] outer-joins them and [`pipeline`] runs the whole thing,
//! writing CSV breakdowns for every stage.

pub mod completion;
pub mod config;
pub mod error;
pub mod fsglob;
pub mod io;
pub mod jobs;
pub mod motion;
pub mod pipeline;
pub mod presence;
pub mod subject;
pub mod summary;
pub mod table;

pub use config::QcConfig;
pub use error::{QcError, QcResult};
pub use pipeline::{PipelineInputs, RunReport, Stage, StageReport, run};
pub use subject::{SubjectFilter, SubjectId};
pub use table::{SubjectTable, Table};
