use std::{
    io::Write,
    path::{Path, PathBuf},
    process::Command,
};

use crate::{
    config::CompilerConfig,
    error::EmitError,
    parameters::{ParameterValues, PULL_PASS},
    template::Template,
};

pub const TEMPLATE_FILE: &str = "template.json";
pub const DEPLOY_FILE: &str = "deploy.sh";
/// the source password is read from this variable when deploy.sh runs, never written into it
pub const PULL_PASS_ENV: &str = "LIVE_STREAMING_PULL_PASS";

fn has_pull_pass(overrides: &ParameterValues) -> bool {
    overrides.get(PULL_PASS).is_some_and(|v| !v.is_empty())
}

/// single quotes a value for the shell, unless it is made of
/// characters that never need quoting
fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// the `aws cloudformation deploy` command for the template next to the script
pub fn deploy_command(conf: &CompilerConfig, overrides: &ParameterValues) -> String {
    let region = &conf.region;
    let stack_name = if conf.stack_name.is_empty() { "live-streaming" } else { conf.stack_name.as_str() };
    let mut cmd = format!(
        "AWS_REGION={region} aws --region {region} cloudformation deploy --stack-name {stack_name} --template-file ./{TEMPLATE_FILE} --capabilities CAPABILITY_IAM"
    );
    if !overrides.is_empty() {
        cmd.push_str(" --parameter-overrides");
        for (key, value) in overrides {
            cmd.push(' ');
            if key == PULL_PASS && !value.is_empty() {
                cmd.push_str(&format!("\"{PULL_PASS}=${PULL_PASS_ENV}\""));
            } else {
                cmd.push_str(&shell_quote(&format!("{key}={value}")));
            }
        }
    }
    cmd
}

fn write_file(path: &Path, contents: &str) -> Result<(), EmitError> {
    let io_err = |source| EmitError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::create(path).map_err(io_err)?;
    file.write_all(contents.as_bytes()).map_err(io_err)?;
    file.flush().map_err(io_err)
}

/// writes template.json and deploy.sh into `out_dir`. Returns both paths.
pub fn output_deployment_files(
    out_dir: &Path,
    template: &Template,
    conf: &CompilerConfig,
    overrides: &ParameterValues,
) -> Result<(PathBuf, PathBuf), EmitError> {
    std::fs::create_dir_all(out_dir).map_err(|source| EmitError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let template_path = out_dir.join(TEMPLATE_FILE);
    write_file(&template_path, &template.to_json_pretty()?)?;

    let script_path = out_dir.join(DEPLOY_FILE);
    let mut script = String::from("#!/usr/bin/env bash\nset -e\n\n");
    script.push_str("# deploy:\n");
    script.push_str("cd \"$(dirname \"$0\")\"\n");
    if has_pull_pass(overrides) {
        tracing::info!(env = PULL_PASS_ENV, "deploy.sh reads PullPass from the environment");
        script.push_str(&format!(": \"${{{PULL_PASS_ENV}:?export {PULL_PASS_ENV} with the source password}}\"\n"));
    }
    script.push_str(&deploy_command(conf, overrides));
    script.push('\n');
    write_file(&script_path, &script)?;

    if cfg!(unix) {
        let out = Command::new("chmod")
            .arg("+x")
            .arg(&script_path)
            .output()
            .map_err(|e| EmitError::Chmod {
                path: script_path.clone(),
                reason: e.to_string(),
            })?;
        if !out.status.success() {
            return Err(EmitError::Chmod {
                path: script_path,
                reason: String::from_utf8_lossy(&out.stderr).to_string(),
            });
        }
    }
    tracing::info!(template = ?template_path, script = ?script_path, "wrote deployment files");
    Ok((template_path, script_path))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overrides_are_quoted() {
        let mut overrides = ParameterValues::new();
        overrides.insert("InputType".into(), "URL_PULL".into());
        overrides.insert("PullUser".into(), "it's me".into());
        let cmd = deploy_command(&CompilerConfig::default(), &overrides);
        assert!(cmd.starts_with("AWS_REGION=us-east-1 aws --region us-east-1 cloudformation deploy --stack-name live-streaming"));
        assert!(cmd.contains("--capabilities CAPABILITY_IAM --parameter-overrides InputType=URL_PULL 'PullUser=it'\\''s me'"));
    }

    #[test]
    fn pull_pass_is_read_from_the_environment() {
        let dir = tempfile::tempdir().unwrap();
        let mut overrides = ParameterValues::new();
        overrides.insert("PullUrl".into(), "https://origin.example.com/live.m3u8".into());
        overrides.insert("PullPass".into(), "hunter2".into());
        let (_, script_path) =
            output_deployment_files(dir.path(), &Template::new("desc"), &CompilerConfig::default(), &overrides).unwrap();
        let script = std::fs::read_to_string(script_path).unwrap();
        assert!(!script.contains("hunter2"));
        assert!(script.contains("\"PullPass=$LIVE_STREAMING_PULL_PASS\""));
        assert!(script.contains(": \"${LIVE_STREAMING_PULL_PASS:?"));
    }

    #[test]
    fn no_overrides_flag_without_values() {
        let cmd = deploy_command(&CompilerConfig::default(), &ParameterValues::new());
        assert!(!cmd.contains("--parameter-overrides"));
    }

    #[test]
    fn writes_template_and_script() {
        let dir = tempfile::tempdir().unwrap();
        let template = Template::new("desc");
        let (template_path, script_path) =
            output_deployment_files(&dir.path().join("out"), &template, &CompilerConfig::default(), &ParameterValues::new())
                .unwrap();
        let back = Template::from_json(&std::fs::read_to_string(template_path).unwrap()).unwrap();
        assert_eq!(back, template);
        let script = std::fs::read_to_string(&script_path).unwrap();
        assert!(script.starts_with("#!/usr/bin/env bash"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&script_path).unwrap().permissions().mode();
            assert_ne!(mode & 0o111, 0);
        }
    }
}
