//! Config namespace: layered YAML settings.

mod settings;

pub use settings::{
    HistorySettings, NotifierSettings, PollSettings, PushSettings, WaitSettings,
    load_notifier_settings, load_notifier_settings_from_paths, notifier_settings_paths,
};
