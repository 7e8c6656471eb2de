//! 把 migrations/*.sql 嵌入 chatfeed 二进制，供 `chatfeed migrate` 使用

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const MIGRATIONS_DIR: &str = "migrations";

/// 收集需要嵌入的迁移文件（`000_` 开头的本地草稿不参与），按文件名排序
fn migration_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_sql = path.extension().is_some_and(|ext| ext == "sql");
        let is_draft = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with("000_"));
        if is_sql && !is_draft {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed={}/", MIGRATIONS_DIR);

    let files = migration_files(Path::new(MIGRATIONS_DIR))?;
    let mut source = String::from(
        "/// chatfeed 数据库迁移：(名称, SQL)，按执行顺序排列\n\
         pub const MIGRATIONS: &[(&str, &str)] = &[\n",
    );
    for path in &files {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        source.push_str(&format!(
            "    ({:?}, include_str!(concat!(env!(\"CARGO_MANIFEST_DIR\"), {:?}))),\n",
            name,
            format!("/{}", path.display()),
        ));
    }
    source.push_str("];\n");

    let out_dir = env::var("OUT_DIR").map_err(|e| io::Error::new(io::ErrorKind::NotFound, e))?;
    fs::write(Path::new(&out_dir).join("migrations.rs"), source)
}
