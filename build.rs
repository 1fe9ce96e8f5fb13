// Build script to compile GLSL shaders to SPIR-V
//
// Best effort: a missing glslc or a failed compile emits a cargo warning
// and the build continues. The runtime shader loader reports missing
// .spv files with a proper error.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let sources = match collect_shader_sources(Path::new("shaders")) {
        Ok(sources) => sources,
        Err(e) => {
            println!("cargo:warning=Could not scan shaders/: {}", e);
            return;
        }
    };

    let out_dir = Path::new("assets/shaders");
    if let Err(e) = fs::create_dir_all(out_dir) {
        println!("cargo:warning=Could not create {}: {}", out_dir.display(), e);
        return;
    }

    for source in sources {
        compile_shader(&source, out_dir);
    }
}

/// All .vert and .frag files under `dir`.
fn collect_shader_sources(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let stage = path.extension().and_then(|ext| ext.to_str());
        if matches!(stage, Some("vert") | Some("frag")) {
            sources.push(path);
        }
    }
    sources.sort();
    Ok(sources)
}

fn compile_shader(input: &Path, out_dir: &Path) {
    // object.vert -> assets/shaders/object.vert.spv
    let file_name = match input.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => return,
    };
    let output = out_dir.join(format!("{}.spv", file_name));

    let result = Command::new("glslc").arg(input).arg("-o").arg(&output).status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input.display(), output.display());
        }
        Ok(status) => {
            println!(
                "cargo:warning=glslc failed on {} (exit code {:?})",
                input.display(),
                status.code()
            );
        }
        Err(e) => {
            println!(
                "cargo:warning=glslc not found ({}); compile manually: glslc {} -o {}",
                e,
                input.display(),
                output.display()
            );
        }
    }
}
