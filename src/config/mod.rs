pub mod settings;

pub use settings::{
    EffectiveConfig, FallbackConfig, InteractivityConfig, LimitsConfig, ModelsConfig, PathsConfig,
    RunModeConfig, TenaciousConfig, ThresholdsConfig, TimeoutsConfig, ToolName, ToolsConfig,
    VerbosityConfig, UNLIMITED,
};
