use std::cell::UnsafeCell;
use std::time::Duration;

use crate::util::os::errno;

/// A counting semaphore backed by an unnamed POSIX semaphore.
///
/// `post` only calls `sem_post`, which is async-signal-safe, so signal handlers
/// can acknowledge a handshake through it. Waiting is done by the coordinator only.
pub struct Semaphore {
    // Boxed so that the `sem_t` never moves after `sem_init`.
    inner: Box<UnsafeCell<libc::sem_t>>,
}

// sem_t is designed to be shared between threads.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub fn new(value: u32) -> Self {
        let inner: Box<UnsafeCell<libc::sem_t>> =
            Box::new(UnsafeCell::new(unsafe { std::mem::zeroed() }));
        if unsafe { libc::sem_init(inner.get(), 0, value) } != 0 {
            gc_fatal!("sem_init failed: {}", std::io::Error::last_os_error());
        }
        Semaphore { inner }
    }

    /// Increment the semaphore. Async-signal-safe.
    pub fn post(&self) {
        // The only documented failure is EOVERFLOW, which needs SEM_VALUE_MAX pending posts.
        unsafe {
            libc::sem_post(self.inner.get());
        }
    }

    /// Block until the semaphore can be decremented.
    pub fn wait(&self) {
        loop {
            if unsafe { libc::sem_wait(self.inner.get()) } == 0 {
                return;
            }
            match errno() {
                libc::EINTR => continue,
                e => gc_fatal!("sem_wait failed: {}", std::io::Error::from_raw_os_error(e)),
            }
        }
    }

    /// Decrement the semaphore if it is positive. Returns false if it was zero.
    pub fn try_wait(&self) -> bool {
        loop {
            if unsafe { libc::sem_trywait(self.inner.get()) } == 0 {
                return true;
            }
            match errno() {
                libc::EINTR => continue,
                libc::EAGAIN => return false,
                e => gc_fatal!("sem_trywait failed: {}", std::io::Error::from_raw_os_error(e)),
            }
        }
    }

    /// Block until the semaphore can be decremented, or `timeout` elapses.
    /// Returns false on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = realtime_deadline(timeout);
        loop {
            if unsafe { libc::sem_timedwait(self.inner.get(), &deadline) } == 0 {
                return true;
            }
            match errno() {
                libc::EINTR => continue,
                libc::ETIMEDOUT => return false,
                e => gc_fatal!(
                    "sem_timedwait failed: {}",
                    std::io::Error::from_raw_os_error(e)
                ),
            }
        }
    }

    /// The current value of the semaphore.
    pub fn value(&self) -> usize {
        let mut value: libc::c_int = 0;
        if unsafe { libc::sem_getvalue(self.inner.get(), &mut value) } != 0 {
            gc_fatal!("sem_getvalue failed: {}", std::io::Error::last_os_error());
        }
        // Linux never reports the number of waiters as a negative value.
        value.max(0) as usize
    }

    /// Consume every pending post. Returns how many were consumed.
    pub fn drain(&self) -> usize {
        let mut drained = 0;
        while self.try_wait() {
            drained += 1;
        }
        drained
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_destroy(self.inner.get());
        }
    }
}

// sem_timedwait measures its deadline against CLOCK_REALTIME.
fn realtime_deadline(timeout: Duration) -> libc::timespec {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut now);
    }
    let nanos = now.tv_nsec as u64 + timeout.subsec_nanos() as u64;
    libc::timespec {
        tv_sec: now.tv_sec + timeout.as_secs() as libc::time_t + (nanos / 1_000_000_000) as libc::time_t,
        tv_nsec: (nanos % 1_000_000_000) as _,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn post_then_wait() {
        let sem = Semaphore::new(0);
        sem.post();
        sem.post();
        assert_eq!(sem.value(), 2);
        sem.wait();
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn wait_timeout_expires() {
        let sem = Semaphore::new(0);
        assert!(!sem.wait_timeout(Duration::from_millis(5)));
        sem.post();
        assert!(sem.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn drain_consumes_everything() {
        let sem = Semaphore::new(3);
        assert_eq!(sem.drain(), 3);
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn post_from_other_threads() {
        let sem = Arc::new(Semaphore::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sem = sem.clone();
                thread::spawn(move || sem.post())
            })
            .collect();
        for _ in 0..4 {
            sem.wait();
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sem.value(), 0);
    }
}
