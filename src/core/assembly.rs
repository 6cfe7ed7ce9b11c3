//! Cloud assembly output: templates, manifest, and staged assets.
//!
//! ```text
//! <out>/manifest.json
//! <out>/<Stack>.template.json
//! <out>/asset.<hex>.zip
//! ```
//!
//! Archives use sorted entries and a fixed timestamp, so unchanged sources
//! produce byte-identical archives.

use super::codegen::{self, SynthesizedStack, TemplateFormat};
use super::types::{Asset, AssetKind};
use crate::error::{Error, Result};
use crate::tripwire::hasher;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub app: String,
    pub stack_order: Vec<String>,
    pub stacks: IndexMap<String, StackEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackEntry {
    pub template: String,
    pub template_hash: String,
    pub dependencies: Vec<String>,
    pub assets: Vec<AssetEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub id: String,
    pub kind: AssetKind,
    pub source: PathBuf,
    pub hash: String,
    /// Staged archive file name (directory assets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged: Option<String>,
    /// Image tag the engine builds (image assets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
}

/// What was written for one stack.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenTemplate {
    pub stack: String,
    pub path: PathBuf,
    pub hash: String,
}

/// Write the full assembly for `stacks` (already in stack order).
pub fn write_assembly(
    out_dir: &Path,
    app: &str,
    stacks: &[SynthesizedStack],
    format: TemplateFormat,
) -> Result<Vec<WrittenTemplate>> {
    write_stacks(out_dir, app, stacks, None, format)
}

/// Write templates and assets of the `selected` stacks only. Manifest
/// entries of the other stacks are carried over from the existing manifest
/// and their template files are left untouched.
pub fn write_partial_assembly(
    out_dir: &Path,
    app: &str,
    stacks: &[SynthesizedStack],
    selected: &[String],
    format: TemplateFormat,
) -> Result<Vec<WrittenTemplate>> {
    write_stacks(out_dir, app, stacks, Some(selected), format)
}

fn write_stacks(
    out_dir: &Path,
    app: &str,
    stacks: &[SynthesizedStack],
    selected: Option<&[String]>,
    format: TemplateFormat,
) -> Result<Vec<WrittenTemplate>> {
    std::fs::create_dir_all(out_dir).map_err(|e| Error::io("create", out_dir, e))?;

    let previous = match selected {
        Some(_) if out_dir.join(MANIFEST_FILE).exists() => Some(load_manifest(out_dir)?),
        _ => None,
    };
    let mut manifest = Manifest {
        version: MANIFEST_VERSION.to_string(),
        app: app.to_string(),
        stack_order: Vec::new(),
        stacks: IndexMap::new(),
    };
    let mut written = Vec::new();

    for stack in stacks {
        if selected.is_some_and(|names| !names.contains(&stack.name)) {
            if let Some(entry) = previous.as_ref().and_then(|m| m.stacks.get(&stack.name)) {
                manifest.stacks.insert(stack.name.clone(), entry.clone());
            }
            continue;
        }
        let file_name = stack.file_name(format);
        let path = out_dir.join(&file_name);
        let text = codegen::render(&stack.template, format)?;
        std::fs::write(&path, &text).map_err(|e| Error::io("write", &path, e))?;
        let hash = hasher::hash_string(&text);

        let mut assets = Vec::new();
        for asset in &stack.assets {
            assets.push(stage_asset(out_dir, asset)?);
        }

        tracing::info!(stack = %stack.name, path = %path.display(), "template written");
        manifest.stacks.insert(
            stack.name.clone(),
            StackEntry {
                template: file_name,
                template_hash: hash.clone(),
                dependencies: stack.dependencies.clone(),
                assets,
            },
        );
        written.push(WrittenTemplate {
            stack: stack.name.clone(),
            path,
            hash,
        });
    }

    manifest.stack_order = manifest.stacks.keys().cloned().collect();
    let manifest_path = out_dir.join(MANIFEST_FILE);
    let mut text = serde_json::to_string_pretty(&manifest)?;
    text.push('\n');
    std::fs::write(&manifest_path, text).map_err(|e| Error::io("write", &manifest_path, e))?;
    Ok(written)
}

pub fn load_manifest(out_dir: &Path) -> Result<Manifest> {
    let path = out_dir.join(MANIFEST_FILE);
    let text = std::fs::read_to_string(&path).map_err(|e| Error::io("read", &path, e))?;
    Ok(serde_json::from_str(&text)?)
}

fn stage_asset(out_dir: &Path, asset: &Asset) -> Result<AssetEntry> {
    let mut entry = AssetEntry {
        id: asset.id.clone(),
        kind: asset.kind,
        source: asset.source.clone(),
        hash: asset.hash.clone(),
        staged: None,
        image_tag: None,
    };
    match asset.kind {
        AssetKind::Directory => {
            let staged = asset.staged_name();
            let target = out_dir.join(&staged);
            if target.exists() {
                tracing::debug!(asset = %asset.id, "already staged");
            } else {
                zip_directory(&asset.source, &target)?;
                tracing::debug!(asset = %asset.id, archive = %staged, "staged");
            }
            entry.staged = Some(staged);
        }
        AssetKind::DockerImage => {
            entry.image_tag = Some(asset.digest().to_string());
        }
    }
    Ok(entry)
}

/// Zip a directory deterministically.
pub fn zip_directory(source: &Path, target: &Path) -> Result<()> {
    let files = hasher::walk_files(source)?;
    let tmp = target.with_extension("zip.tmp");
    let file = std::fs::File::create(&tmp).map_err(|e| Error::io("create", &tmp, e))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    for (rel, full) in files {
        let bytes = std::fs::read(&full).map_err(|e| Error::io("read", &full, e))?;
        writer.start_file(rel, options)?;
        writer
            .write_all(&bytes)
            .map_err(|e| Error::io("write", &tmp, e))?;
    }
    writer.finish()?;
    std::fs::rename(&tmp, target).map_err(|e| Error::io("rename", &tmp, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codegen::synth_stack;
    use crate::core::stack::Stack;
    use crate::core::types::{ResourceDecl, ResourceType};
    use serde_json::json;

    fn stack_with_asset(source: &Path) -> Stack {
        let mut stack = Stack::new("S");
        stack
            .add("Bucket", ResourceDecl::new(ResourceType::Bucket, json!({})))
            .unwrap();
        stack.add_asset(Asset {
            id: "Code".to_string(),
            kind: AssetKind::Directory,
            source: source.to_path_buf(),
            hash: hasher::hash_directory(source).unwrap(),
        });
        stack
    }

    fn code_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s3_function.py"), "def lambda_handler(e, c): pass\n")
            .unwrap();
        std::fs::create_dir(dir.path().join("util")).unwrap();
        std::fs::write(dir.path().join("util").join("helpers.py"), "X = 1\n").unwrap();
        dir
    }

    #[test]
    fn test_assembly_writes_manifest_and_templates() {
        let code = code_dir();
        let out = tempfile::tempdir().unwrap();
        let synth = synth_stack(&stack_with_asset(code.path())).unwrap();
        let written =
            write_assembly(out.path(), "wwapi", &[synth.clone()], TemplateFormat::Json).unwrap();

        assert_eq!(written.len(), 1);
        assert!(out.path().join("S.template.json").exists());
        let manifest = load_manifest(out.path()).unwrap();
        assert_eq!(manifest.stack_order, vec!["S"]);
        let entry = &manifest.stacks["S"];
        assert_eq!(entry.template_hash, written[0].hash);
        let staged = entry.assets[0].staged.as_ref().unwrap();
        assert!(out.path().join(staged).exists());
        assert_eq!(staged, &synth.assets[0].staged_name());
    }

    #[test]
    fn test_assembly_zip_deterministic() {
        let code = code_dir();
        let out = tempfile::tempdir().unwrap();
        zip_directory(code.path(), &out.path().join("a.zip")).unwrap();
        zip_directory(code.path(), &out.path().join("b.zip")).unwrap();
        let a = std::fs::read(out.path().join("a.zip")).unwrap();
        let b = std::fs::read(out.path().join("b.zip")).unwrap();
        assert_eq!(a, b);
        assert!(!out.path().join("a.zip.tmp").exists());
    }

    #[test]
    fn test_assembly_zip_entries() {
        let code = code_dir();
        let out = tempfile::tempdir().unwrap();
        let target = out.path().join("code.zip");
        zip_directory(code.path(), &target).unwrap();
        let archive = zip::ZipArchive::new(std::fs::File::open(&target).unwrap()).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        assert!(names.contains(&"s3_function.py"));
        assert!(names.contains(&"util/helpers.py"));
    }

    #[test]
    fn test_assembly_image_asset_not_zipped() {
        let out = tempfile::tempdir().unwrap();
        let entry = stage_asset(
            out.path(),
            &Asset {
                id: "Image".to_string(),
                kind: AssetKind::DockerImage,
                source: PathBuf::from("frontend"),
                hash: "blake3:beef".to_string(),
            },
        )
        .unwrap();
        assert_eq!(entry.image_tag.as_deref(), Some("beef"));
        assert!(entry.staged.is_none());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_assembly_partial_keeps_other_stacks() {
        let code = code_dir();
        let out = tempfile::tempdir().unwrap();
        let s = synth_stack(&stack_with_asset(code.path())).unwrap();
        let mut other = Stack::new("T");
        other
            .add("Bucket", ResourceDecl::new(ResourceType::Bucket, json!({})))
            .unwrap();
        let t = synth_stack(&other).unwrap();
        write_assembly(out.path(), "wwapi", &[s.clone(), t], TemplateFormat::Json).unwrap();
        let t_path = out.path().join("T.template.json");
        let before = std::fs::read_to_string(&t_path).unwrap();
        let t_hash = load_manifest(out.path()).unwrap().stacks["T"].template_hash.clone();

        other
            .add("Logs", ResourceDecl::new(ResourceType::LogGroup, json!({})))
            .unwrap();
        let t = synth_stack(&other).unwrap();
        let written = write_partial_assembly(
            out.path(),
            "wwapi",
            &[s, t],
            &["S".to_string()],
            TemplateFormat::Json,
        )
        .unwrap();

        assert_eq!(written.len(), 1);
        assert_eq!(written[0].stack, "S");
        assert_eq!(std::fs::read_to_string(&t_path).unwrap(), before);
        let manifest = load_manifest(out.path()).unwrap();
        assert_eq!(manifest.stack_order, vec!["S", "T"]);
        assert_eq!(manifest.stacks["T"].template_hash, t_hash);
    }

    #[test]
    fn test_assembly_partial_without_manifest() {
        let code = code_dir();
        let out = tempfile::tempdir().unwrap();
        let s = synth_stack(&stack_with_asset(code.path())).unwrap();
        let t = synth_stack(&Stack::new("T")).unwrap();
        write_partial_assembly(out.path(), "wwapi", &[s, t], &["S".to_string()], TemplateFormat::Json)
            .unwrap();
        let manifest = load_manifest(out.path()).unwrap();
        assert_eq!(manifest.stack_order, vec!["S"]);
        assert!(!out.path().join("T.template.json").exists());
    }
}
