use std::io::Result;

/// Call a libc function and turn an unexpected return value into the last OS error.
pub fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// The `pthread_*` family returns the error number instead of setting `errno`.
pub fn wrap_pthread_call(f: &dyn Fn() -> libc::c_int) -> Result<()> {
    match f() {
        0 => Ok(()),
        errno => Err(std::io::Error::from_raw_os_error(errno)),
    }
}

/// Read `errno` of the current thread.
pub fn errno() -> libc::c_int {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pthread_error_is_carried() {
        let err = wrap_pthread_call(&|| libc::ESRCH).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ESRCH));
        assert!(wrap_pthread_call(&|| 0).is_ok());
    }

    #[test]
    fn libc_call_success() {
        assert!(wrap_libc_call(&|| unsafe { libc::getpid() } > 0, true).is_ok());
        assert!(wrap_libc_call(&|| unsafe { libc::close(-1) }, 0).is_err());
    }
}
