use std::time::Duration;

/// The default signal used to suspend a mutator. Real-time signals are not used by
/// common runtimes, and SIGRTMIN+6 is what Boehm-style collectors pick on Linux.
fn default_suspend_signal() -> i32 {
    libc::SIGRTMIN() + 6
}

/// The default signal used to restart a mutator.
fn default_resume_signal() -> i32 {
    libc::SIGXCPU
}

fn always_valid<T>(_: &T) -> bool {
    true
}

fn is_positive(v: &u64) -> bool {
    *v > 0
}

fn is_signal_number(v: &i32) -> bool {
    *v > 0 && *v <= libc::SIGRTMAX()
}

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])* $name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Options for the stop-the-world protocol.
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }
        impl Options {
            /// Set an option by its name and a string value. Returns true if the value is set.
            /// An unparsable or invalid value is rejected and the current value is kept.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling set_from_str()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => {
                        warn!("Unknown option {}", s);
                        false
                    }
                }
            }

            /// Options with the built-in defaults, ignoring the environment.
            pub fn builtin() -> Self {
                Options {
                    $($name: $default),*
                }
            }

            /// Read environment variables that start with `prefix` and match any option
            /// (such as QUIESCE_RETRY_SIGNALS), and set the option to its value (if valid).
            pub fn read_env_var_settings(&mut self, prefix: &str) {
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(prefix) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { self.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Self::builtin();
                options.read_env_var_settings(ENV_PREFIX);
                options
            }
        }
    ]
}

/// Environment variables with this prefix override option defaults.
pub const ENV_PREFIX: &str = "QUIESCE_";

options! {
    /// Re-send SUSPEND/RESUME to threads that have not acknowledged within `retry_interval_us`.
    retry_signals:      bool    [always_valid] = true,
    /// Report every pause at the info level, instead of the debug level.
    verbose:            bool    [always_valid] = false,
    /// How long (in microseconds) to wait for acknowledgments before re-sending signals.
    retry_interval_us:  u64     [is_positive] = 100_000,
    /// The polling step (in microseconds) while waiting for acknowledgments with retries enabled.
    wait_unit_us:       u64     [is_positive] = 3_000,
    /// The signal number used to suspend mutators.
    suspend_signal:     i32     [is_signal_number] = default_suspend_signal(),
    /// The signal number used to resume mutators.
    resume_signal:      i32     [is_signal_number] = default_resume_signal(),
}

impl Options {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_micros(self.retry_interval_us)
    }

    pub fn wait_unit(&self) -> Duration {
        Duration::from_micros(self.wait_unit_us)
    }
}
