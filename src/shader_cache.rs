// Shader cache - GLSL sources compiled to SPIR-V on demand
//
// Each source `foo.vert` is cached as `foo.vert.spv` next to it. The cache is
// rebuilt only when missing or older than the source; stale artifacts of
// deleted sources are left alone.

use crate::error::ShaderError;
use std::ffi::OsString;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Offline GLSL to SPIR-V compiler
pub trait ShaderCompiler {
    /// Compile `source` and return the SPIR-V bytes, or the compiler's
    /// diagnostic text on failure.
    fn compile(&self, source: &Path) -> Result<Vec<u8>, String>;
}

/// Runs `glslc` (part of the Vulkan SDK), stage inferred from the extension
pub struct Glslc {
    program: String,
}

impl Glslc {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ShaderCompiler for Glslc {
    fn compile(&self, source: &Path) -> Result<Vec<u8>, String> {
        let output = Command::new(&self.program)
            .arg(source)
            .arg("-o")
            .arg("-")
            .output()
            .map_err(|e| {
                format!(
                    "failed to run {} ({}). Install the Vulkan SDK or compile manually:\n  {} {} -o {}",
                    self.program,
                    e,
                    self.program,
                    source.display(),
                    cache_path(source).display()
                )
            })?;

        if !output.status.success() {
            let diagnostics = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(if diagnostics.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                diagnostics
            });
        }

        Ok(output.stdout)
    }
}

/// Location of the compiled artifact for a shader source
pub fn cache_path(source: &Path) -> PathBuf {
    let mut path = OsString::from(source.as_os_str());
    path.push(".spv");
    PathBuf::from(path)
}

pub struct ShaderCache<C> {
    compiler: C,
}

impl<C: ShaderCompiler> ShaderCache<C> {
    pub fn new(compiler: C) -> Self {
        Self { compiler }
    }

    /// Return the compiled bytes for `source`, recompiling first if the
    /// cached artifact is missing or older than the source.
    pub fn ensure_compiled(&self, source: &Path) -> Result<Vec<u8>, ShaderError> {
        let source_meta = match std::fs::metadata(source) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ShaderError::SourceNotFound(source.to_path_buf()));
            }
            Err(e) => return Err(io_error(source, e)),
        };

        let spv_path = cache_path(source);

        if !is_stale(source, &source_meta, &spv_path)? {
            log::debug!("Shader cache hit: {}", spv_path.display());
            return std::fs::read(&spv_path).map_err(|e| io_error(&spv_path, e));
        }

        log::info!("Compiling {} -> {}", source.display(), spv_path.display());

        let bytes = self
            .compiler
            .compile(source)
            .map_err(|diagnostics| ShaderError::Compile {
                path: source.to_path_buf(),
                diagnostics,
            })?;

        std::fs::write(&spv_path, &bytes).map_err(|e| io_error(&spv_path, e))?;

        Ok(bytes)
    }

    /// Like [`ensure_compiled`](Self::ensure_compiled), decoded to SPIR-V words
    pub fn load_words(&self, source: &Path) -> Result<Vec<u32>, ShaderError> {
        let bytes = self.ensure_compiled(source)?;
        ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| ShaderError::InvalidSpirv {
            path: cache_path(source),
            source: e,
        })
    }
}

/// The cache is stale when absent or strictly older than the source
fn is_stale(
    source: &Path,
    source_meta: &std::fs::Metadata,
    spv_path: &Path,
) -> Result<bool, ShaderError> {
    let spv_meta = match std::fs::metadata(spv_path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(io_error(spv_path, e)),
    };

    let source_time = source_meta.modified().map_err(|e| io_error(source, e))?;
    let spv_time = spv_meta.modified().map_err(|e| io_error(spv_path, e))?;

    Ok(source_time > spv_time)
}

fn io_error(path: &Path, source: std::io::Error) -> ShaderError {
    ShaderError::Io {
        path: path.to_path_buf(),
        source,
    }
}
