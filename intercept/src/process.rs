//! Process identity lookup
//!
//! Resolution is best-effort and done fresh for every event: the querying
//! process may be gone by the time we look, in which case a placeholder is
//! returned instead of an error.

use crate::record::ProcessInfo;

/// Maps a process id to its name and executable path
pub trait ProcessResolver: Send + Sync {
    fn resolve(&self, pid: u32) -> ProcessInfo;
}

impl<R: ProcessResolver + ?Sized> ProcessResolver for Box<R> {
    fn resolve(&self, pid: u32) -> ProcessInfo {
        (**self).resolve(pid)
    }
}

impl<R: ProcessResolver + ?Sized> ProcessResolver for std::sync::Arc<R> {
    fn resolve(&self, pid: u32) -> ProcessInfo {
        (**self).resolve(pid)
    }
}

/// The resolver for the host platform
#[cfg(target_os = "linux")]
pub fn default_resolver() -> Box<dyn ProcessResolver> {
    Box::new(ProcfsResolver)
}

#[cfg(windows)]
pub fn default_resolver() -> Box<dyn ProcessResolver> {
    Box::new(Win32Resolver)
}

/// Text after the last path separator
pub fn name_from_path(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

#[cfg(target_os = "linux")]
pub use self::procfs_resolver::ProcfsResolver;

#[cfg(target_os = "linux")]
mod procfs_resolver {
    use super::{ProcessResolver, name_from_path};
    use crate::record::ProcessInfo;
    use procfs::process::Process;

    /// Reads `/proc/<pid>`: `comm` for the name, the `exe` link for the path,
    /// with the first `cmdline` token as the fallback for both.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ProcfsResolver;

    impl ProcessResolver for ProcfsResolver {
        fn resolve(&self, pid: u32) -> ProcessInfo {
            let Ok(raw_pid) = i32::try_from(pid) else {
                return ProcessInfo::placeholder(pid);
            };
            let process = match Process::new(raw_pid) {
                Ok(process) => process,
                Err(err) => {
                    log::debug!("cannot open /proc entry for pid {}: {}", pid, err);
                    return ProcessInfo::placeholder(pid);
                }
            };

            // Read lazily, only needed when one of the primary lookups fails
            let mut argv0: Option<Option<String>> = None;
            let mut first_arg = || {
                argv0
                    .get_or_insert_with(|| {
                        process
                            .cmdline()
                            .ok()
                            .and_then(|args| args.into_iter().next())
                            .filter(|arg| !arg.is_empty())
                    })
                    .clone()
            };

            let name = match process.stat() {
                Ok(stat) if !stat.comm.is_empty() => Some(stat.comm),
                _ => first_arg().map(|arg| name_from_path(&arg).to_string()),
            };

            let path = match process.exe() {
                Ok(exe) => Some(exe.to_string_lossy().into_owned()),
                Err(err) => {
                    log::debug!("cannot read exe link for pid {}: {}", pid, err);
                    first_arg()
                }
            };

            match (name, path) {
                (None, None) => ProcessInfo::placeholder(pid),
                (name, path) => ProcessInfo {
                    pid,
                    name: name.unwrap_or_else(|| format!("PID: {}", pid)),
                    path: path.unwrap_or_default(),
                },
            }
        }
    }
}

#[cfg(windows)]
pub use self::win32_resolver::Win32Resolver;

#[cfg(windows)]
mod win32_resolver {
    use super::{ProcessResolver, name_from_path};
    use crate::record::ProcessInfo;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, MAX_PATH};
    use windows_sys::Win32::System::ProcessStatus::GetProcessImageFileNameW;
    use windows_sys::Win32::System::Threading::{
        OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION, QueryFullProcessImageNameW,
    };

    /// Opens a limited-information handle and asks for the full image path
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Win32Resolver;

    struct OwnedHandle(HANDLE);

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            unsafe { CloseHandle(self.0) };
        }
    }

    impl ProcessResolver for Win32Resolver {
        fn resolve(&self, pid: u32) -> ProcessInfo {
            let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
            if handle.is_null() {
                log::debug!("cannot open process {}: {}", pid, std::io::Error::last_os_error());
                return ProcessInfo::placeholder(pid);
            }
            let handle = OwnedHandle(handle);

            match image_path(&handle) {
                Some(path) => ProcessInfo {
                    pid,
                    name: name_from_path(&path).to_string(),
                    path,
                },
                None => {
                    log::debug!("cannot read image path of process {}: {}", pid, std::io::Error::last_os_error());
                    ProcessInfo::placeholder(pid)
                }
            }
        }
    }

    fn image_path(handle: &OwnedHandle) -> Option<String> {
        let mut buffer = [0u16; MAX_PATH as usize];

        let mut size = buffer.len() as u32;
        let ok = unsafe { QueryFullProcessImageNameW(handle.0, PROCESS_NAME_WIN32, buffer.as_mut_ptr(), &mut size) };
        if ok != 0 && size > 0 {
            return Some(String::from_utf16_lossy(&buffer[..size as usize]));
        }

        // Legacy API, returns an NT device path
        let len = unsafe { GetProcessImageFileNameW(handle.0, buffer.as_mut_ptr(), buffer.len() as u32) };
        if len > 0 {
            return Some(String::from_utf16_lossy(&buffer[..len as usize]));
        }

        None
    }
}
