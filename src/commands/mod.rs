pub mod get;
pub mod login;

use crate::auth::credentials::{CredentialResolver, TerminalPrompt};
use crate::auth::{AuthError, Credentials, CredentialSource};
use crate::cli::CredentialArgs;
use std::path::Path;

/// 按 参数 → 环境变量 → 凭据文件 → 交互输入 的顺序取得凭据
pub(crate) fn resolve_credentials(
    config_dir: &Path,
    args: &CredentialArgs,
    use_file: bool,
) -> Result<(Credentials, CredentialSource), AuthError> {
    let prompt = TerminalPrompt;
    let mut resolver = CredentialResolver::new(config_dir).with_prompt(&prompt);
    if !use_file {
        resolver = resolver.without_file();
    }
    resolver.resolve(args.username.clone(), args.password.clone())
}
