use common::Language;
use common::config::ToolchainConfig;

/// Name of the binary produced by native compilers.
const NATIVE_BINARY: &str = "solution";

/// How a language is built and started inside a box.
pub trait LanguageRuntime {
    /// File name the source is written to.
    fn source_file(&self) -> &'static str;

    /// Compiler invocation, or `None` for interpreted languages.
    fn compile_argv(&self, toolchain: &ToolchainConfig) -> Option<Vec<String>>;

    fn run_argv(&self, toolchain: &ToolchainConfig, memory_limit_mb: u64) -> Vec<String>;

    /// Whether an address-space rlimit is compatible with the runtime.
    fn address_space_limit(&self) -> bool;

    /// Stderr text the runtime prints when an allocation is refused.
    fn out_of_memory_markers(&self) -> &'static [&'static str];

    /// Whether a failed run died from a refused allocation rather than a bug.
    fn ran_out_of_memory(&self, stderr: &str) -> bool {
        self.out_of_memory_markers()
            .iter()
            .any(|marker| stderr.contains(marker))
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl LanguageRuntime for Language {
    fn source_file(&self) -> &'static str {
        match self {
            Language::C => "main.c",
            Language::Cpp => "main.cpp",
            Language::Java => "Main.java",
            Language::Python => "main.py",
            Language::JavaScript => "main.js",
        }
    }

    fn compile_argv(&self, toolchain: &ToolchainConfig) -> Option<Vec<String>> {
        match self {
            Language::C => Some(argv(&[
                toolchain.gcc.as_str(),
                "-O2",
                "-std=c17",
                "-o",
                NATIVE_BINARY,
                self.source_file(),
                "-lm",
            ])),
            Language::Cpp => Some(argv(&[
                toolchain.gxx.as_str(),
                "-O2",
                "-std=c++17",
                "-o",
                NATIVE_BINARY,
                self.source_file(),
            ])),
            Language::Java => Some(argv(&[
                toolchain.javac.as_str(),
                "-encoding",
                "UTF-8",
                self.source_file(),
            ])),
            Language::Python | Language::JavaScript => None,
        }
    }

    fn run_argv(&self, toolchain: &ToolchainConfig, memory_limit_mb: u64) -> Vec<String> {
        match self {
            Language::C | Language::Cpp => vec![format!("./{NATIVE_BINARY}")],
            Language::Java => vec![
                toolchain.java.clone(),
                format!("-Xmx{memory_limit_mb}m"),
                "-Xss64m".to_string(),
                "-XX:+UseSerialGC".to_string(),
                "-cp".to_string(),
                ".".to_string(),
                "Main".to_string(),
            ],
            Language::Python => argv(&[toolchain.python.as_str(), "-S", self.source_file()]),
            Language::JavaScript => argv(&[toolchain.node.as_str(), self.source_file()]),
        }
    }

    fn address_space_limit(&self) -> bool {
        !matches!(self, Language::Java | Language::JavaScript)
    }

    fn out_of_memory_markers(&self) -> &'static [&'static str] {
        match self {
            // A refused malloc in C is indistinguishable from any other crash.
            Language::C => &[],
            Language::Cpp => &["std::bad_alloc"],
            Language::Java => &["java.lang.OutOfMemoryError"],
            Language::Python => &["MemoryError"],
            Language::JavaScript => &["JavaScript heap out of memory"],
        }
    }
}
