use std::path::PathBuf;

pub const DAEMON_TCP_PORT: u16 = 9877;

const APP_DIR: &str = "airwave";

/// Overrides both data and config locations (`$AIRWAVE_HOME/data`,
/// `$AIRWAVE_HOME/config`).
const HOME_ENV: &str = "AIRWAVE_HOME";

#[cfg(unix)]
pub fn mpv_socket_name() -> String {
    format!("{}/airwave-mpv-{}.sock", std::env::temp_dir().display(), std::process::id())
}

#[cfg(windows)]
pub fn mpv_socket_name() -> String {
    format!("airwave-mpv-{}", std::process::id())
}

#[cfg(unix)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server={}", mpv_socket_name())
}

#[cfg(windows)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name())
}

fn home_override(sub: &str) -> Option<PathBuf> {
    let home = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty())?;
    Some(PathBuf::from(home).join(sub))
}

/// Persisted state and the log file.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = home_override("data") {
        return dir;
    }
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

/// `config.toml` and the optional `stations.toml`.
pub fn config_dir() -> PathBuf {
    if let Some(dir) = home_override("config") {
        return dir;
    }
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

/// Locate mpv: `MPV_PATH`, then next to our executable, then `PATH`.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("MPV_PATH").map(PathBuf::from) {
        if path.exists() {
            return Some(path);
        }
    }

    let exe_name = mpv_binary_name();
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(exe_name)))
        .filter(|p| p.exists());
    if beside_exe.is_some() {
        return beside_exe;
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(exe_name))
        .find(|p| p.exists())
}
