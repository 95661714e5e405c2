use std::path::PathBuf;

use kometa_error::KometaResult;
use tracing::{debug, warn};

/// Раздача статических файлов из одного каталога.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Читает файл `name` из корня.
    ///
    /// Только имена без каталогов: всё, что содержит разделители пути,
    /// `..` или начинается с точки, отклоняется как отсутствующее.
    pub async fn load(
        &self,
        name: &str,
    ) -> KometaResult<Option<Vec<u8>>> {
        if !is_safe_name(name) {
            warn!(file = %name, "Rejected static file name");
            return Ok(None);
        }

        let path = self.root.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(file = %name, bytes = bytes.len(), "Static file served");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(file = %path.display(), "Static file not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.contains("..")
}

/// MIME-тип по расширению файла.
pub fn content_type(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_names() {
        assert!(is_safe_name("index.html"));
        assert!(is_safe_name("kometa.js"));
        assert!(!is_safe_name(""));
        assert!(!is_safe_name("../etc/passwd"));
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name("."));
        assert!(!is_safe_name(".env"));
        assert!(!is_safe_name("a/b.js"));
        assert!(!is_safe_name("a\\b.js"));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type("APP.JS"), "application/javascript; charset=utf-8");
        assert_eq!(content_type("noext"), "application/octet-stream");
    }

    /// Тест проверяет чтение файла и отказ для путей за пределами корня.
    #[tokio::test]
    async fn test_load() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("web");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("index.html"), b"<html></html>").unwrap();
        std::fs::write(tmp.path().join("secret.txt"), b"secret").unwrap();

        let files = StaticFiles::new(&root);
        assert_eq!(
            files.load("index.html").await.unwrap(),
            Some(b"<html></html>".to_vec())
        );
        assert_eq!(files.load("missing.js").await.unwrap(), None);
        assert_eq!(files.load("../secret.txt").await.unwrap(), None);
    }
}
