//! Copies across the user/kernel boundary

use ksched_api::{Error, Result};

use super::manager::{Kernel, Proc};

/// Destination of a copy: the calling process's address space or a kernel buffer
pub enum UserDst<'a> {
    User(usize),
    Kernel(&'a mut [u8]),
}

/// Source of a copy: the calling process's address space or a kernel buffer
pub enum UserSrc<'a> {
    User(usize),
    Kernel(&'a [u8]),
}

impl Kernel {
    /// Copy `src` to a user address or a kernel buffer
    pub fn either_copyout(&self, dst: UserDst<'_>, src: &[u8]) -> Result<()> {
        match dst {
            UserDst::User(addr) => {
                let p = self.myproc().ok_or(Error::NoSuchProcess)?;
                self.copy_out_proc(p, addr, src)
            }
            UserDst::Kernel(buf) => {
                let dst = buf.get_mut(..src.len()).ok_or(Error::BadAddress)?;
                dst.copy_from_slice(src);
                Ok(())
            }
        }
    }

    /// Fill `dst` from a user address or a kernel buffer
    pub fn either_copyin(&self, dst: &mut [u8], src: UserSrc<'_>) -> Result<()> {
        match src {
            UserSrc::User(addr) => {
                let p = self.myproc().ok_or(Error::NoSuchProcess)?;
                self.copy_in_proc(p, dst, addr)
            }
            UserSrc::Kernel(buf) => {
                let src = buf.get(..dst.len()).ok_or(Error::BadAddress)?;
                dst.copy_from_slice(src);
                Ok(())
            }
        }
    }

    pub(crate) fn copy_out_proc(&self, p: &Proc, addr: usize, bytes: &[u8]) -> Result<()> {
        // Safety: `p` is the running caller
        let space = unsafe { p.data_mut() }.space.ok_or(Error::BadAddress)?;
        let end = addr.checked_add(bytes.len()).ok_or(Error::BadAddress)?;
        if end > p.size() {
            return Err(Error::BadAddress);
        }
        self.vm.copy_out(space, addr, bytes).inspect_err(|e| {
            log::warn!("copyout: {:#x}+{} failed: {}", addr, bytes.len(), e);
        })
    }

    pub(crate) fn copy_in_proc(&self, p: &Proc, dst: &mut [u8], addr: usize) -> Result<()> {
        // Safety: `p` is the running caller
        let space = unsafe { p.data_mut() }.space.ok_or(Error::BadAddress)?;
        let end = addr.checked_add(dst.len()).ok_or(Error::BadAddress)?;
        if end > p.size() {
            return Err(Error::BadAddress);
        }
        self.vm.copy_in(space, dst, addr)
    }
}
