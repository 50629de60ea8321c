use crate::auth::credentials::{credentials_file_path, write_credentials_file};
use crate::auth::{self, Authenticator, CredentialSource};
use crate::cli::LoginArgs;
use crate::core::{Confirmation, StdinConfirmation};
use crate::Client;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::info;

/// `login` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// 只做了校验
    Checked(CredentialSource),
    Stored(PathBuf),
    /// 用户拒绝覆盖已有的凭据文件
    Kept(PathBuf),
}

pub async fn run(client: Client, args: LoginArgs) -> anyhow::Result<()> {
    let authenticator = client.authenticator()?;
    let outcome = login(
        &client.config().config_dir,
        &args,
        &authenticator,
        &StdinConfirmation,
    )
    .await?;

    match outcome {
        LoginOutcome::Checked(source) => info!("Valid credentials from {:?}", source),
        LoginOutcome::Stored(path) => info!("Credentials file stored in {}", path.display()),
        LoginOutcome::Kept(path) => info!("Abort, {} was left untouched", path.display()),
    }
    Ok(())
}

pub async fn login(
    config_dir: &Path,
    args: &LoginArgs,
    authenticator: &dyn Authenticator,
    confirmation: &dyn Confirmation,
) -> anyhow::Result<LoginOutcome> {
    if args.check_credentials_valid {
        let (credentials, source) = super::resolve_credentials(config_dir, &args.credentials, true)?;
        auth::ensure_valid(authenticator, &credentials).await?;
        return Ok(LoginOutcome::Checked(source));
    }

    let path = credentials_file_path(config_dir);
    if path.exists()
        && !args.force_overwrite
        && !confirmation.confirm(&format!(
            "File {} already exists, overwrite it?",
            path.display()
        ))
    {
        return Ok(LoginOutcome::Kept(path));
    }

    // 重新录入时不读旧文件
    let (credentials, _) = super::resolve_credentials(config_dir, &args.credentials, false)?;
    auth::ensure_valid(authenticator, &credentials).await?;

    let path = write_credentials_file(config_dir, &credentials)
        .with_context(|| format!("写入凭据文件失败: {}", path.display()))?;
    Ok(LoginOutcome::Stored(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::read_credentials_file;
    use crate::auth::{AuthError, Credentials};
    use crate::cli::CredentialArgs;
    use crate::core::AlwaysConfirm;
    use async_trait::async_trait;

    struct AcceptOnly(&'static str);

    #[async_trait]
    impl Authenticator for AcceptOnly {
        async fn validate(&self, _username: &str, password: &str) -> Result<bool, AuthError> {
            Ok(password == self.0)
        }
    }

    struct Decline;

    impl Confirmation for Decline {
        fn confirm(&self, _message: &str) -> bool {
            false
        }
    }

    fn args(password: &str) -> LoginArgs {
        LoginArgs {
            credentials: CredentialArgs {
                username: Some("alice".to_string()),
                password: Some(password.to_string()),
            },
            ..LoginArgs::default()
        }
    }

    #[tokio::test]
    async fn stores_valid_credentials() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let outcome = login(temp_dir.path(), &args("secret"), &AcceptOnly("secret"), &AlwaysConfirm)
            .await
            .unwrap();

        let path = credentials_file_path(temp_dir.path());
        assert_eq!(outcome, LoginOutcome::Stored(path.clone()));
        assert_eq!(
            read_credentials_file(&path).unwrap(),
            Some(Credentials::new("alice", "secret"))
        );
    }

    #[tokio::test]
    async fn invalid_credentials_are_not_written() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let err = login(temp_dir.path(), &args("wrong"), &AcceptOnly("secret"), &AlwaysConfirm)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::InvalidCredentials)
        ));
        assert!(!credentials_file_path(temp_dir.path()).exists());
    }

    #[tokio::test]
    async fn existing_file_needs_confirmation_or_force() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        write_credentials_file(temp_dir.path(), &Credentials::new("bob", "old")).unwrap();
        let path = credentials_file_path(temp_dir.path());

        let outcome = login(temp_dir.path(), &args("secret"), &AcceptOnly("secret"), &Decline)
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::Kept(path.clone()));
        assert_eq!(
            read_credentials_file(&path).unwrap(),
            Some(Credentials::new("bob", "old"))
        );

        let mut forced = args("secret");
        forced.force_overwrite = true;
        login(temp_dir.path(), &forced, &AcceptOnly("secret"), &Decline)
            .await
            .unwrap();
        assert_eq!(
            read_credentials_file(&path).unwrap(),
            Some(Credentials::new("alice", "secret"))
        );
    }

    #[tokio::test]
    async fn check_only_reports_source() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut check = args("secret");
        check.check_credentials_valid = true;

        let outcome = login(temp_dir.path(), &check, &AcceptOnly("secret"), &AlwaysConfirm)
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::Checked(CredentialSource::Argument));
        assert!(!credentials_file_path(temp_dir.path()).exists());
    }
}
