pub mod assessment;
pub mod bundle;
pub mod loaders;
pub mod scan;

pub use assessment::{AssessmentStructure, PageKind, PaperVersions, QuestionSpec};
pub use bundle::{Bundle, BundleReport, PageReport, PushSummary, RawPage, StatusCounts};
pub use loaders::{load_all_bundles, load_assessment, load_bundle_dir};
pub use scan::{
    ContentHash, CornerSlots, ErrorKind, ExtraDestination, Identity, ImageId, PagePosition,
    PageStatus, Rotation, RotationReading, ScannedImage,
};
