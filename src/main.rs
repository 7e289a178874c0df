//! Reslock CLI: run a command while a suitable resource is allocated.
//!
//! Allocates a resource matching the given requirements, injects its fields
//! into the child environment as uppercased variables, runs the trailing
//! command, and exits with the child's exit code. The RAII guard releases
//! the resource on every exit path, early errors and panics included.

use clap::Parser;
use reslock::{create_provider, Allocator, Requirements, ReslockError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Run a command while a suitable resource is allocated.
///
/// Example: reslock --requirements online=true -- echo using resource $ID
#[derive(Parser, Debug)]
#[command(name = "reslock")]
#[command(author, version, about)]
struct Cli {
    /// Directory holding one marker file per held resource.
    #[arg(long, default_value = ".")]
    lock_folder: PathBuf,

    /// Resource inventory: JSON file path or http(s) URL.
    #[arg(long, default_value = "./resources.json")]
    resources: String,

    /// Timeout in seconds for allocating a suitable resource.
    #[arg(long, default_value_t = 1)]
    timeout: u64,

    /// Hostname override (defaults to the system hostname).
    #[arg(long)]
    hostname: Option<String>,

    /// Requirements as a JSON object or key=value&key2=value2 string.
    #[arg(long, default_value = "{}")]
    requirements: String,

    /// Only load and validate the inventory, then exit.
    #[arg(long)]
    validate_only: bool,

    /// Command to execute while the resource is allocated.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> reslock::Result<i32> {
    let provider = create_provider(&cli.resources)?;

    if cli.validate_only {
        println!(
            "resource inventory OK ({} resources)",
            provider.snapshot().len()
        );
        return Ok(0);
    }

    if cli.command.is_empty() {
        return Err(ReslockError::Usage("command is mandatory".to_string()));
    }

    let mut allocator = Allocator::new(provider, &cli.lock_folder);
    if let Some(hostname) = &cli.hostname {
        allocator = allocator.with_hostname(hostname);
    }

    let requirements = Requirements::parse(&cli.requirements)?;
    let guard = allocator.auto_lock(&requirements, Duration::from_secs(cli.timeout))?;

    let env = resource_env(guard.resource().fields());
    println!("{}", serde_json::to_string(&env).unwrap_or_default());

    let status = std::process::Command::new(&cli.command[0])
        .args(&cli.command[1..])
        .envs(&env)
        .status()?;

    guard.release()?;
    // A signal-terminated child carries no exit code.
    Ok(status.code().unwrap_or(1))
}

/// Map resource fields into environment variables: keys uppercased, string
/// values verbatim, everything else as JSON text.
fn resource_env(fields: &serde_json::Map<String, Value>) -> BTreeMap<String, String> {
    fields
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.to_uppercase(), text)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("reslock").chain(args.iter().copied()))
    }

    #[test]
    fn resource_env_uppercases_and_stringifies() {
        let fields = json!({"id": "dut-1", "online": true, "slots": 4});
        let env = resource_env(fields.as_object().unwrap());
        assert_eq!(env.get("ID"), Some(&"dut-1".to_string()));
        assert_eq!(env.get("ONLINE"), Some(&"true".to_string()));
        assert_eq!(env.get("SLOTS"), Some(&"4".to_string()));
    }

    #[test]
    fn missing_command_is_usage_error() {
        let dir = TempDir::new().unwrap();
        let resources = dir.path().join("resources.json");
        std::fs::write(&resources, r#"[{"id": "1"}]"#).unwrap();

        let err = run(cli(&[
            "--resources",
            resources.to_str().unwrap(),
            "--lock-folder",
            dir.path().to_str().unwrap(),
        ]))
        .unwrap_err();
        assert!(matches!(err, ReslockError::Usage(_)));
    }

    #[test]
    fn validate_only_reports_ok() {
        let dir = TempDir::new().unwrap();
        let resources = dir.path().join("resources.json");
        std::fs::write(&resources, r#"[{"id": "1"}, {"id": "2"}]"#).unwrap();

        let code = run(cli(&[
            "--resources",
            resources.to_str().unwrap(),
            "--validate-only",
        ]))
        .unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn validate_only_fails_on_duplicate_ids() {
        let dir = TempDir::new().unwrap();
        let resources = dir.path().join("resources.json");
        std::fs::write(&resources, r#"[{"id": "1"}, {"id": "1"}]"#).unwrap();

        let err = run(cli(&[
            "--resources",
            resources.to_str().unwrap(),
            "--validate-only",
        ]))
        .unwrap_err();
        assert!(matches!(err, ReslockError::Validation(_)));
    }

    #[test]
    fn run_injects_env_and_passes_exit_code_through() {
        let dir = TempDir::new().unwrap();
        let locks = TempDir::new().unwrap();
        let resources = dir.path().join("resources.json");
        let host = hostname::get().unwrap().to_string_lossy().to_string();
        std::fs::write(
            &resources,
            serde_json::to_string(&json!([
                {"id": "dut-1", "hostname": host, "online": true}
            ]))
            .unwrap(),
        )
        .unwrap();

        let code = run(cli(&[
            "--resources",
            resources.to_str().unwrap(),
            "--lock-folder",
            locks.path().to_str().unwrap(),
            "sh",
            "-c",
            "test \"$ID\" = dut-1",
        ]))
        .unwrap();
        assert_eq!(code, 0);

        // Released on the way out.
        assert_eq!(std::fs::read_dir(locks.path()).unwrap().count(), 0);
    }

    #[test]
    fn run_surfaces_nonzero_child_exit_code() {
        let dir = TempDir::new().unwrap();
        let locks = TempDir::new().unwrap();
        let resources = dir.path().join("resources.json");
        let host = hostname::get().unwrap().to_string_lossy().to_string();
        std::fs::write(
            &resources,
            serde_json::to_string(&json!([
                {"id": "dut-1", "hostname": host, "online": true}
            ]))
            .unwrap(),
        )
        .unwrap();

        let code = run(cli(&[
            "--resources",
            resources.to_str().unwrap(),
            "--lock-folder",
            locks.path().to_str().unwrap(),
            "sh",
            "-c",
            "exit 7",
        ]))
        .unwrap();
        assert_eq!(code, 7);
    }

    #[test]
    fn hostname_override_filters_inventory() {
        let dir = TempDir::new().unwrap();
        let locks = TempDir::new().unwrap();
        let resources = dir.path().join("resources.json");
        std::fs::write(&resources, r#"[{"id": "1", "hostname": "h1", "online": true}]"#)
            .unwrap();

        let err = run(cli(&[
            "--resources",
            resources.to_str().unwrap(),
            "--lock-folder",
            locks.path().to_str().unwrap(),
            "--hostname",
            "h2",
            "true",
        ]))
        .unwrap_err();
        assert!(matches!(err, ReslockError::ResourceNotFound(_)));
    }
}
