//! Binding of the CAEN HV wrapper library (`libcaenhvwrapper`).
//!
//! Only compiled with the `caen-sdk` feature. The wrapper is not thread-safe
//! per handle; [`CaenHvWrapper`] is owned by a single
//! [`HvDeviceInterface`](crate::HvDeviceInterface), which is itself guarded by
//! the sequencer's hardware mutex.

#![allow(unsafe_code)]

use crate::library::{HvLibrary, LinkType, SlotInfo, SystemType, VendorCode};
use libc::{c_char, c_int, c_uchar, c_ushort, c_void};
use std::ffi::{CStr, CString};
use std::ptr;

type CaenHvResult = c_int;

const CAENHV_OK: CaenHvResult = 0;

#[link(name = "caenhvwrapper")]
extern "C" {
    fn CAENHV_InitSystem(
        system: c_int,
        link_type: c_int,
        arg: *mut c_void,
        user_name: *const c_char,
        passwd: *const c_char,
        handle: *mut c_int,
    ) -> CaenHvResult;

    fn CAENHV_DeinitSystem(handle: c_int) -> CaenHvResult;

    fn CAENHV_GetCrateMap(
        handle: c_int,
        nr_of_slot: *mut c_ushort,
        nr_of_ch_list: *mut *mut c_ushort,
        model_list: *mut *mut c_char,
        description_list: *mut *mut c_char,
        ser_num_list: *mut *mut c_ushort,
        fmw_rel_min_list: *mut *mut c_uchar,
        fmw_rel_max_list: *mut *mut c_uchar,
    ) -> CaenHvResult;

    fn CAENHV_GetChParam(
        handle: c_int,
        slot: c_ushort,
        par_name: *const c_char,
        ch_num: c_ushort,
        ch_list: *const c_ushort,
        par_val_list: *mut c_void,
    ) -> CaenHvResult;

    fn CAENHV_SetChParam(
        handle: c_int,
        slot: c_ushort,
        par_name: *const c_char,
        ch_num: c_ushort,
        ch_list: *const c_ushort,
        par_value: *mut c_void,
    ) -> CaenHvResult;

    fn CAENHV_GetBdParam(
        handle: c_int,
        slot_num: c_ushort,
        slot_list: *const c_ushort,
        par_name: *const c_char,
        par_val_list: *mut c_void,
    ) -> CaenHvResult;

    fn CAENHV_SetBdParam(
        handle: c_int,
        slot_num: c_ushort,
        slot_list: *const c_ushort,
        par_name: *const c_char,
        par_value: *mut c_void,
    ) -> CaenHvResult;

    fn CAENHV_GetError(handle: c_int) -> *mut c_char;

    fn CAENHV_Free(arg: *mut c_void) -> CaenHvResult;
}

fn check(result: CaenHvResult) -> Result<(), VendorCode> {
    if result == CAENHV_OK {
        Ok(())
    } else {
        Err(VendorCode(result))
    }
}

/// Parameter names never contain NUL; map the impossible case to a vendor
/// "parameter not found" code.
fn c_name(parameter: &str) -> Result<CString, VendorCode> {
    CString::new(parameter).map_err(|_| VendorCode(0x12))
}

/// The real vendor library.
#[derive(Debug, Default)]
pub struct CaenHvWrapper {
    last_error: String,
}

impl CaenHvWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    fn record<T>(&mut self, handle: c_int, result: Result<T, VendorCode>) -> Result<T, VendorCode> {
        if result.is_err() {
            // SAFETY: GetError returns a pointer to a static, NUL-terminated
            // buffer owned by the library, or NULL.
            let message = unsafe {
                let ptr = CAENHV_GetError(handle);
                if ptr.is_null() {
                    String::from("Unknown error")
                } else {
                    CStr::from_ptr(ptr).to_string_lossy().into_owned()
                }
            };
            self.last_error = message;
        }
        result
    }

    fn channel_count(channels: &[u16]) -> Result<c_ushort, VendorCode> {
        c_ushort::try_from(channels.len()).map_err(|_| VendorCode(0x13))
    }
}

/// Read `count` consecutive NUL-terminated strings.
///
/// # Safety
///
/// `ptr` must point to at least `count` consecutive C strings.
unsafe fn read_string_list(mut ptr: *const c_char, count: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let s = CStr::from_ptr(ptr);
        let bytes = s.to_bytes().len();
        out.push(s.to_string_lossy().into_owned());
        ptr = ptr.add(bytes + 1);
    }
    out
}

impl HvLibrary for CaenHvWrapper {
    fn init_system(
        &mut self,
        system: SystemType,
        link: LinkType,
        connection: &str,
        username: &str,
        password: &str,
    ) -> Result<i32, VendorCode> {
        let arg = CString::new(connection).map_err(|_| VendorCode(0x1))?;
        let user = CString::new(username).map_err(|_| VendorCode(0x1))?;
        let pass = CString::new(password).map_err(|_| VendorCode(0x1))?;
        let mut handle: c_int = -1;

        // SAFETY: all pointers are valid for the duration of the call;
        // the library copies the connection argument.
        let result = unsafe {
            CAENHV_InitSystem(
                system as c_int,
                link as c_int,
                arg.as_ptr() as *mut c_void,
                user.as_ptr(),
                pass.as_ptr(),
                &mut handle,
            )
        };
        self.record(handle, check(result))?;
        Ok(handle)
    }

    fn deinit_system(&mut self, handle: i32) -> Result<(), VendorCode> {
        // SAFETY: plain value call
        let result = unsafe { CAENHV_DeinitSystem(handle) };
        self.record(handle, check(result))
    }

    fn crate_map(&mut self, handle: i32) -> Result<Vec<SlotInfo>, VendorCode> {
        let mut slots: c_ushort = 0;
        let mut channels: *mut c_ushort = ptr::null_mut();
        let mut models: *mut c_char = ptr::null_mut();
        let mut descriptions: *mut c_char = ptr::null_mut();
        let mut serials: *mut c_ushort = ptr::null_mut();
        let mut fw_min: *mut c_uchar = ptr::null_mut();
        let mut fw_max: *mut c_uchar = ptr::null_mut();

        // SAFETY: every out-pointer refers to a local; the library allocates
        // the lists, which are released with CAENHV_Free below.
        let result = unsafe {
            CAENHV_GetCrateMap(
                handle,
                &mut slots,
                &mut channels,
                &mut models,
                &mut descriptions,
                &mut serials,
                &mut fw_min,
                &mut fw_max,
            )
        };
        self.record(handle, check(result))?;

        let count = usize::from(slots);
        // SAFETY: on success each list holds `slots` entries.
        let map = unsafe {
            let model_names = read_string_list(models, count);
            let description_names = read_string_list(descriptions, count);
            (0..count)
                .map(|i| SlotInfo {
                    slot: i as u16,
                    model: model_names[i].clone(),
                    description: description_names[i].clone(),
                    channels: *channels.add(i),
                    serial: *serials.add(i),
                    firmware_major: *fw_max.add(i),
                    firmware_minor: *fw_min.add(i),
                })
                .collect()
        };

        // SAFETY: pointers were allocated by the library
        unsafe {
            for list in [
                channels as *mut c_void,
                models as *mut c_void,
                descriptions as *mut c_void,
                serials as *mut c_void,
                fw_min as *mut c_void,
                fw_max as *mut c_void,
            ] {
                if !list.is_null() {
                    CAENHV_Free(list);
                }
            }
        }
        Ok(map)
    }

    fn get_ch_param_float(
        &mut self,
        handle: i32,
        slot: u16,
        parameter: &str,
        channels: &[u16],
    ) -> Result<Vec<f32>, VendorCode> {
        let name = c_name(parameter)?;
        let count = Self::channel_count(channels)?;
        let mut values = vec![0f32; channels.len()];
        // SAFETY: `values` has one slot per channel
        let result = unsafe {
            CAENHV_GetChParam(
                handle,
                slot,
                name.as_ptr(),
                count,
                channels.as_ptr(),
                values.as_mut_ptr() as *mut c_void,
            )
        };
        self.record(handle, check(result))?;
        Ok(values)
    }

    fn get_ch_param_long(
        &mut self,
        handle: i32,
        slot: u16,
        parameter: &str,
        channels: &[u16],
    ) -> Result<Vec<u32>, VendorCode> {
        let name = c_name(parameter)?;
        let count = Self::channel_count(channels)?;
        let mut values = vec![0u32; channels.len()];
        // SAFETY: `values` has one slot per channel
        let result = unsafe {
            CAENHV_GetChParam(
                handle,
                slot,
                name.as_ptr(),
                count,
                channels.as_ptr(),
                values.as_mut_ptr() as *mut c_void,
            )
        };
        self.record(handle, check(result))?;
        Ok(values)
    }

    fn set_ch_param_float(
        &mut self,
        handle: i32,
        slot: u16,
        parameter: &str,
        channels: &[u16],
        value: f32,
    ) -> Result<(), VendorCode> {
        let name = c_name(parameter)?;
        let count = Self::channel_count(channels)?;
        let mut value = value;
        // SAFETY: the value pointer is valid for the call
        let result = unsafe {
            CAENHV_SetChParam(
                handle,
                slot,
                name.as_ptr(),
                count,
                channels.as_ptr(),
                &mut value as *mut f32 as *mut c_void,
            )
        };
        self.record(handle, check(result))
    }

    fn set_ch_param_long(
        &mut self,
        handle: i32,
        slot: u16,
        parameter: &str,
        channels: &[u16],
        value: u32,
    ) -> Result<(), VendorCode> {
        let name = c_name(parameter)?;
        let count = Self::channel_count(channels)?;
        let mut value = value;
        // SAFETY: the value pointer is valid for the call
        let result = unsafe {
            CAENHV_SetChParam(
                handle,
                slot,
                name.as_ptr(),
                count,
                channels.as_ptr(),
                &mut value as *mut u32 as *mut c_void,
            )
        };
        self.record(handle, check(result))
    }

    fn get_bd_param_long(
        &mut self,
        handle: i32,
        slot: u16,
        parameter: &str,
    ) -> Result<u32, VendorCode> {
        let name = c_name(parameter)?;
        let slots = [slot];
        let mut value: u32 = 0;
        // SAFETY: one slot in, one value out
        let result = unsafe {
            CAENHV_GetBdParam(
                handle,
                1,
                slots.as_ptr(),
                name.as_ptr(),
                &mut value as *mut u32 as *mut c_void,
            )
        };
        self.record(handle, check(result))?;
        Ok(value)
    }

    fn set_bd_param_long(
        &mut self,
        handle: i32,
        slot: u16,
        parameter: &str,
        value: u32,
    ) -> Result<(), VendorCode> {
        let name = c_name(parameter)?;
        let slots = [slot];
        let mut value = value;
        // SAFETY: the value pointer is valid for the call
        let result = unsafe {
            CAENHV_SetBdParam(
                handle,
                1,
                slots.as_ptr(),
                name.as_ptr(),
                &mut value as *mut u32 as *mut c_void,
            )
        };
        self.record(handle, check(result))
    }

    fn last_error(&self) -> String {
        self.last_error.clone()
    }
}
