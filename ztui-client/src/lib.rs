pub mod config;
pub mod logging;
pub mod transport;
pub mod window;

pub mod auth {
    use std::{
        fmt, fs, io,
        path::{Path, PathBuf},
    };

    use tracing::{info, warn};

    /// Written into the user's home by the service installer or the auth helper.
    pub const AUTH_TOKEN_FILE_NAME: &str = ".zeroTierOneAuthToken";

    #[derive(Debug)]
    pub enum AuthError {
        NoHomeDirectory,
        HelperNotFound { searched: Vec<PathBuf> },
        TokenUnavailable { path: PathBuf },
    }

    impl AuthError {
        pub fn title(&self) -> &'static str {
            match self {
                AuthError::HelperNotFound { .. } => "Unable to Locate Helper",
                AuthError::NoHomeDirectory | AuthError::TokenUnavailable { .. } => {
                    "Cannot Authorize"
                }
            }
        }

        pub fn user_message(&self) -> String {
            match self {
                AuthError::HelperNotFound { .. } => {
                    "Unable to locate authorization helper, cannot obtain authentication token."
                        .to_owned()
                }
                AuthError::NoHomeDirectory | AuthError::TokenUnavailable { .. } => format!(
                    "Unable to authorize this user to administrate ZeroTier One.\n\n\
                     To do so manually, copy 'authtoken.secret' from the ZeroTier One home \
                     directory to '{AUTH_TOKEN_FILE_NAME}' in your home directory and set file \
                     modes on this file to only be readable by you (e.g. 0600 on Mac or Linux \
                     systems)."
                ),
            }
        }
    }

    impl fmt::Display for AuthError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                AuthError::NoHomeDirectory => write!(f, "cannot determine home directory"),
                AuthError::HelperNotFound { searched } => {
                    write!(f, "auth helper not found (searched {searched:?})")
                }
                AuthError::TokenUnavailable { path } => {
                    write!(f, "no auth token in {}", path.display())
                }
            }
        }
    }

    impl std::error::Error for AuthError {}

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
    }

    pub fn default_token_path() -> Result<PathBuf, AuthError> {
        home_dir()
            .map(|home| home.join(AUTH_TOKEN_FILE_NAME))
            .ok_or(AuthError::NoHomeDirectory)
    }

    /// First line of the token file, trimmed. Missing, unreadable or blank
    /// files all count as "no token".
    pub fn read_token(path: &Path) -> Option<String> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), "failed to read auth token: {err}");
                return None;
            }
        };
        let token = data.lines().next().unwrap_or_default().trim();
        (!token.is_empty()).then(|| token.to_owned())
    }

    /// Reads the token, running the platform auth helper once if it is missing.
    pub fn obtain_token(path: &Path) -> Result<String, AuthError> {
        if let Some(token) = read_token(path) {
            return Ok(token);
        }

        info!(path = %path.display(), "auth token missing, trying auth helper");
        helper::run()?;

        read_token(path).ok_or_else(|| AuthError::TokenUnavailable {
            path: path.to_owned(),
        })
    }

    #[cfg(target_os = "macos")]
    mod helper {
        use std::path::PathBuf;
        use std::process::Command;

        use tracing::{info, warn};

        use super::AuthError;

        const BUNDLED_HELPER: &str =
            "../Resources/helpers/mac/ZeroTier One (Authenticate).app/Contents/MacOS/applet";
        // Running straight out of a source checkout.
        const SOURCE_TREE_HELPER: &str = "../../../../ZeroTierUI/helpers/mac/ZeroTier One (Authenticate).app/Contents/MacOS/applet";

        fn candidates() -> Vec<PathBuf> {
            let exe_dir = std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("."));
            vec![exe_dir.join(BUNDLED_HELPER), exe_dir.join(SOURCE_TREE_HELPER)]
        }

        /// Asks for admin credentials and installs the token file in the
        /// user's home. Blocks until the helper exits.
        pub fn run() -> Result<(), AuthError> {
            let searched = candidates();
            let Some(helper) = searched.iter().find(|path| path.exists()) else {
                return Err(AuthError::HelperNotFound { searched });
            };

            info!(helper = %helper.display(), "running auth helper");
            match Command::new(helper).status() {
                Ok(status) if status.success() => {}
                Ok(status) => warn!(%status, "auth helper exited unsuccessfully"),
                Err(err) => warn!("failed to start auth helper: {err}"),
            }
            Ok(())
        }
    }

    #[cfg(not(target_os = "macos"))]
    mod helper {
        use tracing::debug;

        use super::AuthError;

        pub fn run() -> Result<(), AuthError> {
            debug!("no auth helper on this platform");
            Ok(())
        }
    }

}
