use super::SyscallReturn;
use crate::{
    arch::UserContext,
    prelude::*,
    process::program_loader::do_execve,
    util::user::{read_cstring_from_user, read_cstring_vec},
};

const MAX_ARGS: usize = 1024;
const MAX_ARG_LEN: usize = 4096;

pub(super) fn sys_execve(
    path_addr: Vaddr,
    argv_addr: Vaddr,
    envp_addr: Vaddr,
    ctx: &mut UserContext,
) -> Result<SyscallReturn> {
    let path = read_cstring_from_user(path_addr, crate::fs::utils::PATH_MAX)?;
    let argv = read_cstring_vec(argv_addr, MAX_ARGS, MAX_ARG_LEN)?;
    let envp = read_cstring_vec(envp_addr, MAX_ARGS, MAX_ARG_LEN)?;
    do_execve(path.to_str()?, argv, envp, ctx)?;
    // The frame now points at the fresh image's entry.
    Ok(SyscallReturn::NoReturn)
}
