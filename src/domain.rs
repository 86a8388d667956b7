mod enums;
mod model;
mod result;
mod settings;
mod values;


pub use enums::{
    AggregateState, CleanStrategy, EnumToken, ExecutionMode, FileSelection, OperationState,
    OptimizationLevel, RiskLevel, SafetyLevel, Status,
};
pub use model::{Configuration, Operation, Profile};
pub use result::CleanResult;
pub use settings::{
    HomebrewSettings, NixGenerationsSettings, OperationSettings, SettingsKind,
    SystemTempSettings, TempFilesSettings, DEFAULT_TIMEOUT_SECONDS, KNOWN_OPERATIONS,
    OP_HOMEBREW, OP_NIX_GENERATIONS, OP_NPM_CACHE, OP_PNPM_STORE, OP_SYSTEM_TEMP, OP_TEMP_FILES,
};
pub use values::{
    canonical_duration, format_duration, parse_duration, GenerationCount, MaxDiskUsagePercent,
    ProfileName, PROFILE_NAME_MAX_LEN,
};
