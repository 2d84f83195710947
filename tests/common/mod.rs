#![allow(dead_code)]

use std::path::{Path, PathBuf};

/// A v4 state document as the CLI would write it after creating a VPC.
pub const VPC_STATE: &str = r#"{"version":4,"terraform_version":"1.5.7","serial":1,"lineage":"fake-cli","resources":[{"mode":"managed","type":"aws_vpc","name":"example","provider":"provider[\"registry.terraform.io/hashicorp/aws\"]","instances":[{"schema_version":1,"attributes":{"id":"vpc-123","cidr_block":"10.0.0.0/16","tags":{"Name":"example"}},"sensitive_attributes":{"secret_token":"hunter2"}}]}]}"#;

/// A v4 state document with no resources left.
pub const EMPTY_STATE: &str = r#"{"version":4,"serial":2,"resources":[]}"#;

/// Write an executable `/bin/sh` stand-in for the provisioner CLI.
/// The body sees the subcommand as `$1` and runs in the workspace dir.
pub fn write_fake_cli(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("terraform");
    let script = format!("#!/bin/sh\n{}\nexit 0\n", body);
    std::fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }
    path
}

/// A well-behaved CLI: `init` drops the init lock, `apply` installs the
/// given state, `destroy` empties it, `plan` reports no diff.
pub fn standard_cli(dir: &Path, apply_state: &str) -> PathBuf {
    standard_cli_with(dir, apply_state, "")
}

/// Like [`standard_cli`] but with extra shell commands prepended to the
/// `apply` branch (e.g. `sleep 30` to simulate a long-running create).
pub fn standard_cli_with(dir: &Path, apply_state: &str, apply_prefix: &str) -> PathBuf {
    let state_file = dir.join("apply.tfstate");
    std::fs::write(&state_file, apply_state).unwrap();
    let empty_file = dir.join("empty.tfstate");
    std::fs::write(&empty_file, EMPTY_STATE).unwrap();

    // `destroy` leaves a marker so a later `refresh` observes the
    // resource as gone, the way a real cloud lookup would.
    let body = format!(
        r#"case "$1" in
  init) : > .terraform.lock.hcl ;;
  refresh) [ -f .destroyed ] && cp "{empty}" terraform.tfstate ;;
  plan) exit 0 ;;
  show) cat terraform.tfstate 2>/dev/null || echo "{{}}" ;;
  apply) {prefix}cp "{state}" terraform.tfstate ;;
  destroy) cp "{empty}" terraform.tfstate; : > .destroyed ;;
esac"#,
        prefix = apply_prefix,
        state = state_file.display(),
        empty = empty_file.display(),
    );
    write_fake_cli(dir, &body)
}
