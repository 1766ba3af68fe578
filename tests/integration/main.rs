//! Integration tests for cacheguard

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// Binary pointed at a config file inside `dir`
    fn cacheguard(dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("cacheguard");
        cmd.env("CACHEGUARD_CONFIG", dir.path().join("config.toml"));
        cmd
    }

    #[test]
    fn help_displays() {
        let dir = TempDir::new().unwrap();
        cacheguard(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("cache penetration and breakdown"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        cacheguard(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("cacheguard"));
    }

    #[test]
    fn config_path_honours_env() {
        let dir = TempDir::new().unwrap();
        cacheguard(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                dir.path().join("config.toml").display().to_string(),
            ));
    }

    #[test]
    fn config_show_defaults() {
        let dir = TempDir::new().unwrap();
        cacheguard(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[store]"))
            .stdout(predicate::str::contains("absent_ttl_secs = 120"));
    }

    #[test]
    fn config_init_then_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        cacheguard(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
        assert!(dir.path().join("config.toml").exists());

        cacheguard(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));
    }

    #[test]
    fn invalid_config_reports_hint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[store]\nbackend = 7\n").unwrap();

        cacheguard(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("config init --force"));
    }

    #[test]
    fn forced_init_repairs_invalid_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[store]\nbackend = 7\n").unwrap();

        cacheguard(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));

        cacheguard(&dir)
            .args(["config", "init", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));

        cacheguard(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("backend = \"memory\""));
    }

    #[test]
    fn simulate_stampede_loads_once() {
        let dir = TempDir::new().unwrap();
        cacheguard(&dir)
            .args(["simulate", "stampede", "--callers", "10", "--loader-ms", "50"])
            .assert()
            .success()
            .stdout(predicate::str::contains("spot:1001"))
            .stdout(predicate::str::contains("10/10"))
            .stdout(predicate::str::contains("Source loaded 1 time(s) for 10 callers"));
    }

    #[test]
    fn simulate_refresh_serves_stale() {
        let dir = TempDir::new().unwrap();
        cacheguard(&dir)
            .args(["simulate", "refresh", "--callers", "4", "--loader-ms", "20"])
            .assert()
            .success()
            .stdout(predicate::str::contains("4/4"))
            .stdout(predicate::str::contains("fresh \"fresh post\""));
    }

    #[test]
    fn simulate_penetration_remembers_absence() {
        let dir = TempDir::new().unwrap();
        cacheguard(&dir)
            .args(["simulate", "penetration", "-n", "5", "--loader-ms", "0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Source loaded 1 time(s) for 5 callers"));
    }

    #[test]
    fn simulate_unknown_scenario_fails() {
        let dir = TempDir::new().unwrap();
        cacheguard(&dir)
            .args(["simulate", "avalanche"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid value"));
    }
}
