use std::time::Duration;

use uuid::Uuid;

/// Client identification and transport settings.
///
/// Plex Media Server identifies clients by a set of `X-Plex-*` headers. The
/// values here feed those headers and the `User-Agent`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,

    pub device_name: String,
    pub client_id: Uuid,

    pub platform: String,
    pub platform_version: String,

    pub user_agent: String,

    /// Timeout for a whole request, from connecting to reading the body.
    pub timeout: Duration,
}

impl Config {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a configuration describing this machine.
    ///
    /// The client identifier is derived from the machine id so that the
    /// server sees the same client across restarts.
    ///
    /// # Panics
    ///
    /// Panics when the package name or version contain characters that are
    /// illegal in a `User-Agent` product token.
    #[must_use]
    pub fn new() -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        let client_id = match machine_uid::get() {
            Ok(machine_id) => {
                let namespace = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"plex.tv");
                Uuid::new_v5(&namespace, machine_id.as_bytes())
            }
            Err(e) => {
                warn!("could not get machine id, using random client id: {e}");
                Uuid::new_v4()
            }
        };
        trace!("client uuid: {client_id}");

        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
        {
            panic!("application name and/or version invalid (\"{app_name}\"; \"{app_version}\")");
        }

        let platform = match std::env::consts::OS {
            "macos" => "MacOSX",
            "linux" => "Linux",
            "windows" => "Windows",
            other => other,
        }
        .to_owned();
        let platform_version =
            sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));

        // Fall back to a neutral platform token rather than refusing to run.
        let os_token = if platform.contains(illegal_chars)
            || platform_version.is_empty()
            || platform_version.contains(illegal_chars)
        {
            String::from("unknown")
        } else {
            format!("{platform}/{platform_version}")
        };

        let user_agent = format!("{app_name}/{app_version} (Rust; {os_token})");
        trace!("user agent: {user_agent}");

        let device_name = sysinfo::System::host_name().unwrap_or_else(|| app_name.clone());

        Self {
            app_name,
            app_version,

            device_name,
            client_id,

            platform,
            platform_version,

            user_agent,

            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
