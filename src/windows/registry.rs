//! Producer install path lookup

use super::wide_string;
use crate::source::InstallLocator;
use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;
use std::path::PathBuf;
use tracing::{debug, trace};
use windows::Win32::Foundation::ERROR_SUCCESS;
use windows::Win32::System::Registry::{
    HKEY_LOCAL_MACHINE, REG_ROUTINE_FLAGS, RRF_RT_REG_SZ, RRF_SUBKEY_WOW6432KEY, RegGetValueW,
};
use windows::core::PCWSTR;

/// Registry key MSI Afterburner's installer writes
pub const AFTERBURNER_REGISTRY_KEY: &str = "Software\\MSI\\Afterburner";
/// Value holding the install directory
pub const AFTERBURNER_INSTALL_PATH_VALUE: &str = "InstallPath";

const MAX_PATH: usize = 260;

/// Reads the install path from `HKLM`.
///
/// Afterburner is a 32-bit application, so a 64-bit reader falls back to the
/// WOW6432Node view when the native view has no key.
#[derive(Debug, Clone, Default)]
pub struct RegistryInstallLocator;

impl RegistryInstallLocator {
    fn query(flags: REG_ROUTINE_FLAGS) -> Option<PathBuf> {
        let subkey = wide_string(AFTERBURNER_REGISTRY_KEY);
        let value = wide_string(AFTERBURNER_INSTALL_PATH_VALUE);
        let mut buf = vec![0u16; MAX_PATH];
        let mut size = (buf.len() * std::mem::size_of::<u16>()) as u32;

        let status = unsafe {
            RegGetValueW(
                HKEY_LOCAL_MACHINE,
                PCWSTR::from_raw(subkey.as_ptr()),
                PCWSTR::from_raw(value.as_ptr()),
                flags,
                None,
                Some(buf.as_mut_ptr().cast()),
                Some(&mut size as *mut u32),
            )
        };
        if status != ERROR_SUCCESS {
            trace!(status = status.0, "Install path registry query failed");
            return None;
        }

        let chars = (size as usize / std::mem::size_of::<u16>()).min(buf.len());
        let end = buf[..chars].iter().position(|&c| c == 0).unwrap_or(chars);
        if end == 0 {
            return None;
        }
        Some(PathBuf::from(OsString::from_wide(&buf[..end])))
    }
}

impl InstallLocator for RegistryInstallLocator {
    fn install_path(&mut self) -> Option<PathBuf> {
        let path =
            Self::query(RRF_RT_REG_SZ).or_else(|| Self::query(RRF_RT_REG_SZ | RRF_SUBKEY_WOW6432KEY));
        if path.is_none() {
            debug!("MSI Afterburner install path not found in registry");
        }
        path
    }
}
