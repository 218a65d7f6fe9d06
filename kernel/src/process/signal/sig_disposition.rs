use super::{constants::COUNT_ALL_SIGS, sig_action::SigAction, sig_num::SigNum};

#[derive(Debug, Clone, Copy)]
pub struct SigDispositions {
    map: [SigAction; COUNT_ALL_SIGS],
}

impl Default for SigDispositions {
    fn default() -> Self {
        Self::new()
    }
}

impl SigDispositions {
    pub fn new() -> Self {
        Self {
            map: [SigAction::default(); COUNT_ALL_SIGS],
        }
    }

    pub fn get(&self, num: SigNum) -> SigAction {
        self.map[Self::idx(num)]
    }

    pub fn set(&mut self, num: SigNum, action: SigAction) -> SigAction {
        core::mem::replace(&mut self.map[Self::idx(num)], action)
    }

    pub fn set_default(&mut self, num: SigNum) {
        self.map[Self::idx(num)] = SigAction::Dfl;
    }

    /// exec keeps ignored dispositions but drops user handlers, whose
    /// addresses are meaningless in the fresh image.
    pub fn inherit_for_exec(&mut self) {
        for action in &mut self.map {
            if let SigAction::User { .. } = action {
                *action = SigAction::Dfl;
            }
        }
    }

    fn idx(num: SigNum) -> usize {
        (num.as_u8() - 1) as usize
    }
}
