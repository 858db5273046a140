//! Headless chart rendering pipeline.
//!
//! Loads a delimited dataset, coerces designated fields to numbers, renders it with a
//! browser-hosted charting library inside an isolated page, and writes the result as
//! a standalone SVG document:
//! load -> coerce -> acquire sandbox -> inject scripts -> render -> normalize -> persist -> release.
//!
//! [`datawrapper`] publishes the same data to the hosted Datawrapper service instead.

pub mod bridge;
pub mod chrome;
pub mod coerce;
pub mod config;
pub mod dataset;
pub mod datawrapper;
pub mod errors;
pub mod events;
pub mod injector;
pub mod mapping;
pub mod normalize;
pub mod pipeline;
pub mod presets;
pub mod sandbox;
pub mod testing;

pub use bridge::*;
pub use chrome::*;
pub use coerce::*;
pub use config::*;
pub use dataset::*;
pub use datawrapper::*;
pub use errors::*;
pub use events::{
    PipelineEvent, PipelineEventKind, PipelineEventObserver, PipelineEventReceiver,
    PipelineEventSender, PipelineEventSink, PipelineStage, SharedPipelineEventObserver,
    pipeline_event_channel,
};
pub use injector::*;
pub use mapping::*;
pub use normalize::*;
pub use pipeline::*;
pub use presets::*;
pub use sandbox::*;
pub use testing::{SandboxLogEntry, ScriptedSandbox};
