//! Rock Ridge / SUSP parsing: POSIX attributes, long names, symlinks
//! and continuation areas hidden in the directory records' system use
//! fields.

use super::{get_u32_le, IsoFS, BLOCK_SIZE};
use crate::prelude::*;

/// Everything Rock Ridge can say about one record.
#[derive(Debug, Clone, Default)]
pub struct RockRidge {
    pub name: Option<String>,
    pub mode: Option<u32>,
    pub nlink: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub rdev: Option<u64>,
    pub symlink: Option<String>,
    pub mtime: Option<u64>,
    pub atime: Option<u64>,
}

/// Walk a system-use area, chasing CE continuations.
pub(super) fn parse(fs: &IsoFS, su_area: &[u8]) -> Result<RockRidge> {
    let mut rr = RockRidge::default();
    parse_area(fs, su_area, &mut rr, 0)?;
    Ok(rr)
}

fn parse_area(fs: &IsoFS, area: &[u8], rr: &mut RockRidge, depth: usize) -> Result<()> {
    if depth > 8 {
        return_errno_with_message!(Errno::EIO, "rock ridge continuation loop");
    }
    let mut off = 0;
    // A continuation found in this area is followed after the walk.
    let mut continuation: Option<(u32, u32, u32)> = None;
    while off + 4 <= area.len() {
        let sig = &area[off..off + 2];
        let len = area[off + 2] as usize;
        if len < 4 || off + len > area.len() {
            break;
        }
        let body = &area[off + 4..off + len];
        match sig {
            b"SP" | b"ER" | b"RR" | b"PN" | b"CL" | b"PL" | b"RE" => {
                // Recognized but carrying nothing we model beyond PN.
                if sig == b"PN" && body.len() >= 16 {
                    let high = get_u32_le(body, 0) as u64;
                    let low = get_u32_le(body, 8) as u64;
                    rr.rdev = Some((high << 32) | low);
                }
            }
            b"PX" => {
                // mode, nlink, uid, gid: each stored LE then BE.
                if body.len() >= 32 {
                    rr.mode = Some(get_u32_le(body, 0));
                    rr.nlink = Some(get_u32_le(body, 8));
                    rr.uid = Some(get_u32_le(body, 16));
                    rr.gid = Some(get_u32_le(body, 24));
                }
            }
            b"NM" => {
                let flags = body[0];
                let fragment = String::from_utf8_lossy(&body[1..]).into_owned();
                match rr.name.as_mut() {
                    // CONTINUE flag glues fragments together.
                    Some(name) => name.push_str(&fragment),
                    None => rr.name = Some(fragment),
                }
                let _ = flags;
            }
            b"SL" => {
                let mut target = rr.symlink.take().unwrap_or_default();
                parse_sl_components(&body[1..], &mut target);
                rr.symlink = Some(target);
            }
            b"TF" => {
                // Flags say which 7-byte timestamps follow, in order:
                // creation, modify, access, attributes, ...
                let flags = body[0];
                let mut pos = 1;
                let mut take = |present: bool| -> Option<u64> {
                    if !present || pos + 7 > body.len() {
                        return None;
                    }
                    let secs = decode_iso_time(&body[pos..pos + 7]);
                    pos += 7;
                    Some(secs)
                };
                let _creation = take(flags & 0x01 != 0);
                rr.mtime = take(flags & 0x02 != 0).or(rr.mtime);
                rr.atime = take(flags & 0x04 != 0).or(rr.atime);
            }
            b"CE" => {
                if body.len() >= 24 {
                    continuation = Some((
                        get_u32_le(body, 0),
                        get_u32_le(body, 8),
                        get_u32_le(body, 16),
                    ));
                }
            }
            _ => {}
        }
        off += len;
    }
    if let Some((block, ce_off, ce_len)) = continuation {
        if ce_len as usize > BLOCK_SIZE {
            return_errno_with_message!(Errno::EIO, "oversized rock ridge continuation");
        }
        let mut cont = vec![0u8; ce_len as usize];
        fs.read_extent(block, ce_off as usize, &mut cont)?;
        parse_area(fs, &cont, rr, depth + 1)?;
    }
    Ok(())
}

/// SL component records: `(flags, len, content)*` where flags encode
/// ".", ".." and root.
fn parse_sl_components(mut body: &[u8], target: &mut String) {
    while body.len() >= 2 {
        let flags = body[0];
        let len = body[1] as usize;
        if body.len() < 2 + len {
            break;
        }
        let content = &body[2..2 + len];
        if !target.is_empty() && target != "/" {
            target.push('/');
        }
        match flags & 0x0e {
            0x02 => target.push('.'),
            0x04 => target.push_str(".."),
            0x08 => {
                target.clear();
                target.push('/');
                // Root component: no separator after the slash.
                body = &body[2 + len..];
                continue;
            }
            _ => target.push_str(&String::from_utf8_lossy(content)),
        }
        body = &body[2 + len..];
    }
}

/// ISO 7-byte time: years-since-1900, month, day, hour, minute,
/// second, tz offset.
fn decode_iso_time(raw: &[u8]) -> u64 {
    let year = raw[0] as u64 + 1900;
    let month = raw[1].clamp(1, 12) as u64;
    let day = raw[2].clamp(1, 31) as u64;
    let (hour, min, sec) = (raw[3] as u64, raw[4] as u64, raw[5] as u64);
    // Coarse but monotone epoch conversion.
    let days_per_month = [0u64, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
    let years = year - 1970;
    let leap_days = (year.saturating_sub(1969)) / 4;
    let days = years * 365 + leap_days + days_per_month[(month - 1) as usize] + (day - 1);
    ((days * 24 + hour) * 60 + min) * 60 + sec
}
