//! The two WWAPI stacks and the app composing them.

pub mod backend;
pub mod frontend;

use crate::core::parser;
use crate::core::stack::App;
use crate::core::types::WwapiConfig;
use crate::error::Result;
use std::path::Path;

/// Build both stacks and declare the frontend's dependency on the backend.
///
/// Same configuration and same asset contents give an identical app.
pub fn build_app(config: &WwapiConfig, root: &Path) -> Result<App> {
    let mut app = App::new(&config.name);
    let backend = backend::build(config, root)?;
    let frontend = frontend::build(config, root)?;
    let (backend_name, frontend_name) = (backend.name.clone(), frontend.name.clone());
    app.add_stack(backend)?;
    app.add_stack(frontend)?;
    app.add_dependency(&frontend_name, &backend_name)?;
    Ok(app)
}

/// Parse, validate, and build the app declared by a config file. Relative
/// paths in the config resolve against the file's directory.
pub fn load(path: &Path) -> Result<(WwapiConfig, App)> {
    let config = parser::parse_config_file(path)?;
    parser::into_result(parser::validate_config(&config))?;
    let root = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let app = build_app(&config, root)?;
    parser::into_result(parser::validate_app(&app))?;
    Ok((config, app))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::codegen::{self, TemplateFormat};

    pub fn config() -> WwapiConfig {
        parser::parse_config("version: \"1.0\"\nname: wwapi\n").unwrap()
    }

    /// Project directory with function code, layer, index settings, and a
    /// container build context.
    pub fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for sub in ["lambda/function", "lambda/layer/python", "json", "frontend"] {
            std::fs::create_dir_all(root.join(sub)).unwrap();
        }
        for handler in ["s3_function", "os_index_function", "chat_function"] {
            std::fs::write(
                root.join("lambda/function").join(format!("{}.py", handler)),
                "def lambda_handler(event, context):\n    return {}\n",
            )
            .unwrap();
        }
        std::fs::write(root.join("lambda/layer/python/common.py"), "VERSION = 1\n").unwrap();
        for name in ["paths", "components", "vector"] {
            std::fs::write(
                root.join("json").join(format!("index_{}.json", name)),
                r#"{"settings": {"index": {"number_of_shards": 1}}}"#,
            )
            .unwrap();
        }
        std::fs::write(root.join("frontend/Dockerfile"), "FROM python:3.11-slim\n").unwrap();
        std::fs::write(root.join("frontend/app.py"), "import streamlit\n").unwrap();
        dir
    }

    #[test]
    fn test_stacks_frontend_depends_on_backend() {
        let dir = project();
        let app = build_app(&config(), dir.path()).unwrap();
        assert!(app.stacks["WwapiFrontendStack"]
            .dependencies
            .contains(&"WwapiStack".to_string()));
        let order = crate::core::resolver::build_stack_order(&app).unwrap();
        assert_eq!(order, vec!["WwapiStack", "WwapiFrontendStack"]);
    }

    #[test]
    fn test_stacks_graph_is_valid() {
        let dir = project();
        let app = build_app(&config(), dir.path()).unwrap();
        let errors = parser::validate_app(&app);
        assert!(
            errors.is_empty(),
            "{:?}",
            errors.iter().map(|e| &e.message).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_stacks_build_is_deterministic() {
        let dir = project();
        let a = build_app(&config(), dir.path()).unwrap();
        let b = build_app(&config(), dir.path()).unwrap();
        assert_eq!(a, b);
        let render = |app: &App| -> Vec<String> {
            codegen::synth_app(app)
                .unwrap()
                .iter()
                .map(|s| codegen::render(&s.template, TemplateFormat::Json).unwrap())
                .collect()
        };
        assert_eq!(render(&a), render(&b));
    }

    #[test]
    fn test_stacks_asset_change_changes_template() {
        let dir = project();
        let before = codegen::synth_app(&build_app(&config(), dir.path()).unwrap()).unwrap();
        std::fs::write(dir.path().join("lambda/function/chat_function.py"), "# v2\n").unwrap();
        let after = codegen::synth_app(&build_app(&config(), dir.path()).unwrap()).unwrap();
        assert_ne!(before[0].template, after[0].template);
        assert_eq!(before[1].template, after[1].template);
    }

    #[test]
    fn test_stacks_load_from_file() {
        let dir = project();
        let path = dir.path().join("wwapi.yaml");
        std::fs::write(&path, "version: \"1.0\"\nname: wwapi\n").unwrap();
        let (config, app) = load(&path).unwrap();
        assert_eq!(config.name, "wwapi");
        assert_eq!(app.stacks.len(), 2);
    }

    #[test]
    fn test_stacks_load_rejects_invalid_config() {
        let dir = project();
        let path = dir.path().join("wwapi.yaml");
        std::fs::write(&path, "version: \"1.0\"\nname: wwapi\nfrontend:\n  max_azs: 9\n").unwrap();
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("max_azs"));
    }
}
