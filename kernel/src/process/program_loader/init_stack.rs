//! The initial user stack: strings on top, then auxv, envp and argv
//! vectors, argc last so it sits at the final stack pointer.

use crate::{mm::Vm, prelude::*};

pub struct InitStackLayout {
    pub user_sp: Vaddr,
    pub arg_start: Vaddr,
    pub arg_end: Vaddr,
    pub env_start: Vaddr,
    pub env_end: Vaddr,
}

pub(super) fn build(
    vm: &Arc<Vm>,
    stack_top: Vaddr,
    argv: &[CString],
    envp: &[CString],
    auxv: &[(u32, u32)],
) -> Result<InitStackLayout> {
    let mut sp = stack_top;

    // Environment strings first (highest), then argument strings.
    let mut env_ptrs = Vec::with_capacity(envp.len());
    let env_end = sp;
    for env in envp.iter().rev() {
        let bytes = env.as_bytes_with_nul();
        sp -= bytes.len();
        vm.write_bytes(sp, bytes)?;
        env_ptrs.push(sp as u32);
    }
    env_ptrs.reverse();
    let env_start = sp;

    let mut arg_ptrs = Vec::with_capacity(argv.len());
    let arg_end = sp;
    for arg in argv.iter().rev() {
        let bytes = arg.as_bytes_with_nul();
        sp -= bytes.len();
        vm.write_bytes(sp, bytes)?;
        arg_ptrs.push(sp as u32);
    }
    arg_ptrs.reverse();
    let arg_start = sp;

    sp &= !0xf;

    // Vectors, bottom-up: argc | argv... 0 | envp... 0 | auxv... 0 0.
    let words = 1
        + arg_ptrs.len()
        + 1
        + env_ptrs.len()
        + 1
        + 2 * (auxv.len() + 1);
    sp -= words * 4;
    sp &= !0xf;
    let user_sp = sp;

    let mut cursor = sp;
    let mut push = |val: u32| -> Result<()> {
        vm.write_val(cursor, &val)?;
        cursor += 4;
        Ok(())
    };
    push(argv.len() as u32)?;
    for ptr in &arg_ptrs {
        push(*ptr)?;
    }
    push(0)?;
    for ptr in &env_ptrs {
        push(*ptr)?;
    }
    push(0)?;
    for (key, value) in auxv {
        push(*key)?;
        push(*value)?;
    }
    push(super::elf::AT_NULL)?;
    push(0)?;

    Ok(InitStackLayout {
        user_sp,
        arg_start,
        arg_end,
        env_start,
        env_end,
    })
}
