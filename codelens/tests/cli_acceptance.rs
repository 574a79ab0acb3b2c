use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    base: PathBuf,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            base,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    /// Config with every free provider's monthly limit at zero.
    fn write_exhausted_config(&self) -> PathBuf {
        let path = self.base.join("exhausted.toml");
        fs::write(
            &path,
            r#"
[providers.gemini]
monthly_limit = 0

[providers.groq]
monthly_limit = 0

[providers.huggingface]
monthly_limit = 0
"#,
        )
        .expect("failed to write config");
        path
    }
}

fn run_codelens(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("codelens"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .env_remove("OPENAI_API_KEY")
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("GEMINI_API_KEY")
        .env_remove("GROQ_API_KEY")
        .env_remove("HF_TOKEN")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute codelens: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "codelens {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn provider_rows(output: &Output) -> Vec<serde_json::Value> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("providers output is not JSON ({e}):\n{stdout}"))
}

fn status_of<'a>(rows: &'a [serde_json::Value], provider: &str) -> &'a str {
    rows.iter()
        .find(|row| row["provider"] == provider)
        .and_then(|row| row["status"].as_str())
        .unwrap_or_else(|| panic!("provider {provider} missing from listing"))
}

#[test]
fn providers_lists_catalog_with_availability() {
    let env = CliTestEnv::new();

    let args = ["providers", "--format", "json"];
    let output = run_codelens(&env, &args);
    assert_success(&args, &output);

    let rows = provider_rows(&output);
    assert_eq!(rows.len(), 5);
    assert_eq!(status_of(&rows, "gemini"), "available");
    assert_eq!(status_of(&rows, "openai"), "requires_credential");
    assert_eq!(status_of(&rows, "anthropic"), "requires_credential");

    // Quota ledger and log directory live under the XDG dirs
    assert!(env.xdg_data.join("codelens/quota.db").exists());
    assert!(env.xdg_state.join("codelens").exists());
}

#[test]
fn providers_accepts_premium_key() {
    let env = CliTestEnv::new();

    let args = [
        "providers",
        "--format",
        "json",
        "--openai-key",
        "sk-test-0123456789abcdef0123",
    ];
    let output = run_codelens(&env, &args);
    assert_success(&args, &output);

    let rows = provider_rows(&output);
    assert_eq!(status_of(&rows, "openai"), "available");
    // Usable premium providers are listed first
    assert_eq!(rows[0]["provider"], "openai");
}

#[test]
fn providers_text_output_marks_exhausted_quota() {
    let env = CliTestEnv::new();
    let config = env.write_exhausted_config();
    let config = config.to_string_lossy().into_owned();

    let args = ["providers", "--config", config.as_str()];
    let output = run_codelens(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Providers:"));
    assert!(stdout.contains("(limit reached)"), "got:\n{stdout}");
    assert!(stdout.contains("(needs key)"));
}

#[test]
fn review_without_available_provider_returns_degraded_envelope() {
    let env = CliTestEnv::new();
    let config = env.write_exhausted_config();
    let config = config.to_string_lossy().into_owned();
    let source = env.base.join("main.rs");
    fs::write(&source, "fn main() { let x = 1; }").expect("failed to write source");
    let source = source.to_string_lossy().into_owned();

    let args = [
        "review",
        source.as_str(),
        "--config",
        config.as_str(),
        "--format",
        "json",
    ];
    let output = run_codelens(&env, &args);
    assert!(!output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let envelope: serde_json::Value =
        serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("not JSON ({e}):\n{stdout}"));
    assert_eq!(envelope["success"], false);
    assert_eq!(envelope["results"]["confidence"], "low");
    assert!(envelope["metadata"]["error"]
        .as_str()
        .unwrap()
        .contains("no provider available"));
}

#[test]
fn review_missing_file_fails() {
    let env = CliTestEnv::new();

    let output = run_codelens(&env, &["review", "does-not-exist.rs"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read"), "got:\n{stderr}");
}

#[test]
fn analyze_empty_directory_fails() {
    let env = CliTestEnv::new();
    let project = env.base.join("empty-project");
    fs::create_dir_all(&project).expect("failed to create project dir");
    let project = project.to_string_lossy().into_owned();

    let output = run_codelens(&env, &["analyze", project.as_str()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no source files found"), "got:\n{stderr}");
}

#[test]
fn rejects_unknown_analysis_kind() {
    let env = CliTestEnv::new();

    let output = run_codelens(&env, &["review", "x.rs", "--kind", "astrology"]);
    assert!(!output.status.success());
}
