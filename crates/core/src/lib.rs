mod collect;
mod config;
mod dispatch;
mod error;
mod events;
mod exif_reader;
mod metadata;
mod mover;
mod normalizer;
mod orchestrator;
mod record;
mod sanitize;
mod scheduler;
mod template;

pub const DEFAULT_TEMPLATE: &str =
    r#"{{ ExifSubIFD.DateTimeOriginal | date: "%Y%m%d_%H%M%S" }}_##.{{ File.Extension }}"#;

pub use collect::{collect_image_files, CollectStats};
pub use config::{app_paths, load_config, save_config, AppConfig, AppPaths};
pub use dispatch::{
    owner_queue, InlineDispatcher, OwnerDispatcher, OwnerQueue, OwnerTask, QueueDispatcher,
};
pub use error::{MetadataError, MoveError, RenameError};
pub use events::{EventBus, WorkingSetEvent};
pub use exif_reader::ExifMetadataReader;
pub use metadata::{
    build_context, sanitize_key, MetadataEntry, MetadataReader, RawTag, TemplateContext,
};
pub use mover::{is_plain_file_name, CollisionSafeMover, MAX_SEQUENCE, PLACEHOLDER};
pub use normalizer::{
    is_supported_image, normalize_tags, MetadataNormalizer, SUPPORTED_EXTENSIONS,
};
pub use orchestrator::{RenameOrchestrator, RenamedFile, RunReport, RunState};
pub use record::FileRecord;
pub use sanitize::sanitize_component;
pub use scheduler::{AppendStats, PassOutcome, RenameScheduler, SchedulerBuilder};
pub use template::{
    parse_template, render_template, validate_template, CompileError, CompiledTemplate, Expression,
    Filter, LiquidEngine, LiquidTemplate, RenderError, TemplateEngine, TemplatePart,
};
