use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

// Compiles src/bpf/dns_capture.bpf.c into $OUT_DIR/dns_capture.o.
// When the toolchain is missing an empty object is written instead, and the
// kprobe backend then requires --bpf-object at runtime.
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let src_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());

    let ebpf_src = src_dir.join("src/bpf/dns_capture.bpf.c");
    let ebpf_obj = out_dir.join("dns_capture.o");

    println!("cargo:rerun-if-changed={}", ebpf_src.display());
    println!("cargo:rerun-if-env-changed=SKIP_EBPF_BUILD");

    if env::var("CARGO_CFG_TARGET_OS").unwrap() != "linux" {
        write_empty_object(&ebpf_obj);
        return;
    }

    if env::var("SKIP_EBPF_BUILD").is_ok() {
        println!("cargo:warning=SKIP_EBPF_BUILD set - no eBPF object embedded");
        write_empty_object(&ebpf_obj);
        return;
    }

    if let Err(msg) = build_ebpf(&ebpf_src, &ebpf_obj, &out_dir) {
        println!("cargo:warning={}", msg);
        println!("cargo:warning=eBPF object not embedded - pass --bpf-object at runtime");
        write_empty_object(&ebpf_obj);
    }
}

fn build_ebpf(ebpf_src: &Path, ebpf_obj: &Path, out_dir: &Path) -> Result<(), String> {
    if Command::new("clang").arg("--version").output().is_err() {
        return Err("clang not found".to_string());
    }

    if !Path::new("/sys/kernel/btf/vmlinux").exists() {
        return Err("/sys/kernel/btf/vmlinux not found, cannot generate vmlinux.h".to_string());
    }

    let vmlinux = Command::new("bpftool")
        .args(["btf", "dump", "file", "/sys/kernel/btf/vmlinux", "format", "c"])
        .output()
        .map_err(|_| "bpftool not found".to_string())?;
    if !vmlinux.status.success() {
        return Err(format!("bpftool failed: {}", String::from_utf8_lossy(&vmlinux.stderr)));
    }
    fs::write(out_dir.join("vmlinux.h"), &vmlinux.stdout).map_err(|e| e.to_string())?;

    let arch = match env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default().as_str() {
        "aarch64" => "arm64",
        _ => "x86",
    };

    let output = Command::new("clang")
        .args(["-O2", "-g", "-target", "bpf", "-Wall"])
        .arg(format!("-D__TARGET_ARCH_{}", arch))
        .arg(format!("-I{}", out_dir.display()))
        .arg("-c")
        .arg(ebpf_src)
        .arg("-o")
        .arg(ebpf_obj)
        .output()
        .map_err(|e| format!("failed to run clang: {}", e))?;

    if !output.status.success() {
        return Err(format!("eBPF compilation failed: {}", String::from_utf8_lossy(&output.stderr)));
    }

    println!("cargo:warning=eBPF program compiled successfully");
    Ok(())
}

fn write_empty_object(path: &Path) {
    fs::write(path, b"").expect("Failed to create empty eBPF object");
}
