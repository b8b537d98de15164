//! Bundle Compiler
//!
//! Walks the module graph from the staging tree's synthetic entry, asking
//! the [`ResolveHook`] about every import before falling back to default
//! resolution, and renders a single self-contained script:
//!
//! ```text
//! (function () {
//!   var __modules = [
//!     [function (module, exports, __import) { ... }, { "pkg-a": 1 }],
//!     ...
//!   ];
//!   ...
//!   __require(0);
//! })();
//! ```
//!
//! Module ids follow depth-first discovery order, so the same inputs always
//! produce the same bytes.

pub mod lexer;
mod transform;

pub use transform::{ModuleFormat, SyntaxError};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregate::StagingTree;
use crate::resolve::{node, normalize, BuildContext, Resolution, ResolveError, ResolveHook};
use transform::ParsedModule;

/// Source transformation options, read from the host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranspileOptions {
    /// Inject runtime polyfills. Never honoured for the worker bundle.
    pub polyfill: bool,
    /// Emit ES module bodies in strict mode.
    pub strict: bool,
}

impl Default for TranspileOptions {
    fn default() -> Self {
        Self {
            polyfill: false,
            strict: true,
        }
    }
}

impl TranspileOptions {
    /// The host options with polyfill injection removed.
    pub fn for_worker(&self) -> Self {
        if self.polyfill {
            debug!("Dropping polyfill option for the worker bundle");
        }
        Self {
            polyfill: false,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BundleOptions {
    pub minify: bool,
    pub transpile: TranspileOptions,
}

/// The compiled worker script.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub code: String,
    pub minified: bool,
    /// Module files, indexed by module id.
    pub modules: Vec<PathBuf>,
}

/// Error type for bundling
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Cannot find module '{specifier}' imported from {importer}")]
    ModuleNotFound { specifier: String, importer: PathBuf },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Syntax { path: PathBuf, message: String },
}

/// One module in the graph.
struct Module {
    path: PathBuf,
    body: String,
    format: ModuleFormat,
    /// Specifier to module id, in source order.
    dependencies: serde_json::Map<String, serde_json::Value>,
}

struct Graph<'a, H: ?Sized> {
    hook: &'a H,
    ctx: BuildContext,
    strict: bool,
    ids: HashMap<PathBuf, usize>,
    modules: Vec<Option<Module>>,
}

impl<H: ResolveHook + ?Sized> Graph<'_, H> {
    /// Discover `path` and everything it imports. Returns its module id.
    fn visit(&mut self, path: PathBuf) -> Result<usize, BundleError> {
        if let Some(id) = self.ids.get(&path) {
            return Ok(*id);
        }

        let id = self.modules.len();
        self.ids.insert(path.clone(), id);
        self.modules.push(None);

        let source = fs::read_to_string(&path).map_err(|source| BundleError::Read {
            path: path.clone(),
            source,
        })?;
        let syntax = |e: SyntaxError| BundleError::Syntax {
            path: path.clone(),
            message: e.to_string(),
        };
        let parsed = ParsedModule::parse(&path, &source).map_err(syntax)?;

        let mut dependencies = serde_json::Map::new();
        for specifier in &parsed.dependencies {
            let resolved = self.resolve(specifier, &path)?;
            let dependency = self.visit(resolved)?;
            dependencies.insert(specifier.clone(), dependency.into());
        }

        let body = parsed.render(&source, self.strict).map_err(syntax)?;
        self.modules[id] = Some(Module {
            path,
            body,
            format: parsed.format,
            dependencies,
        });
        Ok(id)
    }

    fn resolve(&mut self, specifier: &str, importer: &Path) -> Result<PathBuf, BundleError> {
        if let Resolution::Resolved(path) =
            self.hook.resolve_id(&mut self.ctx, specifier, Some(importer))?
        {
            return Ok(normalize(&path));
        }

        importer
            .parent()
            .and_then(|dir| node::resolve(specifier, dir))
            .map(|path| normalize(&path))
            .ok_or_else(|| BundleError::ModuleNotFound {
                specifier: specifier.to_string(),
                importer: importer.to_path_buf(),
            })
    }
}

/// Compile the staged worker sources into one script.
pub fn compile<H>(
    staging: &StagingTree,
    hook: &H,
    options: &BundleOptions,
) -> Result<Artifact, BundleError>
where
    H: ResolveHook + ?Sized,
{
    let transpile = options.transpile.for_worker();
    let mut graph = Graph {
        hook,
        ctx: BuildContext::new(),
        strict: transpile.strict,
        ids: HashMap::new(),
        modules: Vec::new(),
    };

    graph.visit(normalize(&staging.entry))?;

    // Every slot is filled once `visit` returns for the entry.
    let modules: Vec<Module> = graph.modules.into_iter().flatten().collect();
    let mut code = render(&modules);
    if options.minify {
        code = lexer::minify(&code);
        code.push('\n');
    }

    info!(
        "Bundled {} modules ({} bytes{})",
        modules.len(),
        code.len(),
        if options.minify { ", minified" } else { "" }
    );

    Ok(Artifact {
        code,
        minified: options.minify,
        modules: modules.into_iter().map(|m| m.path).collect(),
    })
}

const PRELUDE: &str = r#"  var __cache = [];
  function __require(id) {
    var cached = __cache[id];
    if (cached) {
      return cached.exports;
    }
    var entry = __modules[id];
    var module = { exports: {} };
    __cache[id] = module;
    entry[0].call(module.exports, module, module.exports, function (specifier) {
      return __require(entry[1][specifier]);
    });
    return module.exports;
  }
  function __export(target, getters) {
    if (!target.__esModule) {
      Object.defineProperty(target, "__esModule", { value: true });
    }
    for (var name in getters) {
      Object.defineProperty(target, name, { enumerable: true, get: getters[name] });
    }
  }
  function __reexport(target, source) {
    Object.keys(source).forEach(function (name) {
      if (name === "default" || Object.prototype.hasOwnProperty.call(target, name)) {
        return;
      }
      Object.defineProperty(target, name, {
        enumerable: true,
        get: function () { return source[name]; }
      });
    });
  }
  function __importDefault(m) {
    return m && m.__esModule ? m.default : m;
  }
"#;

fn render(modules: &[Module]) -> String {
    let mut out = String::from("(function () {\n  var __modules = [\n");

    for module in modules {
        let import = match module.format {
            ModuleFormat::Esm => "__import",
            ModuleFormat::CommonJs | ModuleFormat::Json => "require",
        };
        out.push_str(&format!(
            "    [function (module, exports, {}) {{\n",
            import
        ));
        out.push_str(&module.body);
        out.push_str(&format!(
            "    }}, {}],\n",
            serde_json::Value::Object(module.dependencies.clone())
        ));
    }

    out.push_str("  ];\n");
    out.push_str(PRELUDE);
    out.push_str("  __require(0);\n})();\n");
    out
}
