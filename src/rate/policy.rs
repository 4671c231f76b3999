/// A fixed-window admission policy: at most `max` requests per
/// `window_secs`-second aligned window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub window_secs: u64,
    pub max: u32,
}

/// Route classes with distinct budgets. Mirrors the per-endpoint table the
/// gateway runs in production: chat/AI traffic is the expensive one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    /// Browsing mail, checking folders.
    Default,
    /// Login/refresh traffic.
    Auth,
    /// Mail mutations and sends.
    Email,
    /// LLM-backed endpoints.
    Ai,
}

impl RateClass {
    pub fn policy(self) -> RatePolicy {
        match self {
            RateClass::Default => RatePolicy {
                window_secs: 60,
                max: 300,
            },
            RateClass::Auth => RatePolicy {
                window_secs: 15 * 60,
                max: 100,
            },
            RateClass::Email => RatePolicy {
                window_secs: 60 * 60,
                max: 500,
            },
            RateClass::Ai => RatePolicy {
                window_secs: 60,
                max: 20,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RateClass::Default => "default",
            RateClass::Auth => "auth",
            RateClass::Email => "email",
            RateClass::Ai => "ai",
        }
    }
}
