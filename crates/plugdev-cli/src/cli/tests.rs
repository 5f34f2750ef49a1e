#[cfg(test)]
mod tests {
    use crate::cli::{Cli, Command, parse_port, parse_window};
    use crate::config::{DevMode, UploadTarget, ValidateMode};
    use clap::Parser;
    use std::path::PathBuf;
    use std::time::Duration;

    fn dev(args: &[&str]) -> crate::cli::DevArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Dev(args) => args,
            other => panic!("expected dev, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_window() {
        assert_eq!(parse_window("10m"), Ok("10m".to_string()));
        assert_eq!(parse_window(" 45 "), Ok("45".to_string()));
        assert!(parse_window("soon").is_err());
        assert!(parse_window("0s").is_err());
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("5173"), Ok(5173));
        assert!(parse_port("0").is_err());
        assert!(parse_port("70000").is_err());
        assert!(parse_port("http").is_err());
    }

    #[test]
    fn test_dev_lazy_with_positional_window() {
        let args = dev(&["plugdev", "dev", "--mode", "lazy", "10m"]);
        assert_eq!(args.mode, Some(DevMode::Lazy));
        assert_eq!(args.quiet_window.as_deref(), Some("10m"));

        let overrides = args.overrides(false);
        assert_eq!(overrides.mode, Some(DevMode::Lazy));
        assert_eq!(overrides.lazy_window.as_deref(), Some("10m"));
        assert_eq!(overrides.quiet, None);
        assert_eq!(args.ignored_quiet_window(), None);
    }

    #[test]
    fn test_dev_instant_ignores_positional_window() {
        let args = dev(&["plugdev", "dev", "--mode", "instant", "5m"]);
        assert_eq!(args.overrides(false).lazy_window, None);
        assert_eq!(args.ignored_quiet_window(), Some("5m"));
    }

    #[test]
    fn test_dev_flag_window_wins() {
        let args = dev(&["plugdev", "dev", "--lazy-window", "30s", "5m"]);
        assert_eq!(args.overrides(false).lazy_window.as_deref(), Some("30s"));
    }

    #[test]
    fn test_dev_server_and_upload_flags() {
        let args = dev(&[
            "plugdev", "dev", "--port", "8443", "--host", "0.0.0.0", "--upload", "--cwd", "/work",
        ]);
        let overrides = args.overrides(true);
        assert_eq!(overrides.port, Some(8443));
        assert_eq!(overrides.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(overrides.upload, Some(true));
        assert_eq!(overrides.quiet, Some(true));
        assert_eq!(args.cwd, Some(PathBuf::from("/work")));

        let args = dev(&["plugdev", "dev", "--no-upload"]);
        assert_eq!(args.overrides(false).upload, Some(false));
        assert_eq!(dev(&["plugdev", "dev"]).overrides(false).upload, None);
    }

    #[test]
    fn test_conflicting_flags() {
        assert!(Cli::try_parse_from(["plugdev", "-v", "-q", "dev"]).is_err());
        assert!(Cli::try_parse_from(["plugdev", "dev", "--upload", "--no-upload"]).is_err());
        assert!(Cli::try_parse_from(["plugdev", "dev", "--mode", "sometimes"]).is_err());
        assert!(Cli::try_parse_from(["plugdev", "dev", "--mode", "lazy", "forever"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["plugdev", "dev", "--verbose", "--no-color"]).unwrap();
        assert!(cli.verbose);
        assert!(cli.no_color);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_validate_mode() {
        let cli = Cli::try_parse_from(["plugdev", "validate", "--mode", "warn"]).unwrap();
        match cli.command {
            Command::Validate(args) => {
                assert_eq!(args.mode, Some(ValidateMode::Warn));
                assert_eq!(args.overrides().validate, Some(ValidateMode::Warn));
            }
            other => panic!("expected validate, got {other:?}"),
        }
    }

    #[test]
    fn test_build_upload_target() {
        let cli = Cli::try_parse_from(["plugdev", "build", "--upload", "--target", "prod"]).unwrap();
        match cli.command {
            Command::Build(args) => {
                assert!(args.upload);
                assert_eq!(args.target, UploadTarget::Prod);
            }
            other => panic!("expected build, got {other:?}"),
        }

        let cli = Cli::try_parse_from(["plugdev", "build"]).unwrap();
        assert!(matches!(cli.command, Command::Build(args) if !args.upload && args.target == UploadTarget::Dev));
    }

    #[test]
    fn test_deploy_watch_debounce() {
        let policy = |args: &[&str]| match Cli::try_parse_from(args).unwrap().command {
            Command::DeployWatch(args) => args.policy(Duration::from_millis(200)),
            other => panic!("expected deploy-watch, got {other:?}"),
        };

        let default = policy(&["plugdev", "deploy-watch"]);
        assert_eq!(default.mode, DevMode::Lazy);
        assert_eq!(default.quiet_window, Duration::from_secs(5));

        let ten = policy(&["plugdev", "deploy-watch", "10s"]);
        assert_eq!(ten.quiet_window, Duration::from_secs(10));

        let immediate = policy(&["plugdev", "deploy-watch", "--immediate"]);
        assert_eq!(immediate.mode, DevMode::Instant);
        assert_eq!(immediate.coalesce_delay, Duration::ZERO);

        assert!(Cli::try_parse_from(["plugdev", "deploy-watch", "soon"]).is_err());
        assert!(Cli::try_parse_from(["plugdev", "deploy-watch", "10s", "--immediate"]).is_err());
    }

    #[test]
    fn test_build_worker_is_hidden_but_parses() {
        let cli = Cli::try_parse_from(["plugdev", "build-worker"]).unwrap();
        assert!(matches!(cli.command, Command::BuildWorker(_)));
    }
}
