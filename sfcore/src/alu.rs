//! Operand width abstraction and the width-specific arithmetic
//!
//! The opcode dispatcher is generic over two [`Word`] types, one for the
//! accumulator/memory width (M flag) and one for the index width (X flag).
//! Each width has its own arithmetic implementation; carry, overflow and
//! decimal correction differ between the two.

use crate::cpu::Status;
use crate::device::Data;

pub trait Word: Data + PartialEq + Eq + 'static {
    /// Bits of a 16-bit register that belong to this width
    const MASK: u16;
    const SIGN: u16;

    fn from_u16(v: u16) -> Self;
    fn to_u16(self) -> u16;

    fn is_negative(self) -> bool {
        self.to_u16() & Self::SIGN > 0
    }

    /// Replace the part of a 16-bit register covered by this width
    fn merge(reg: u16, v: Self) -> u16 {
        (reg & !Self::MASK) | v.to_u16()
    }

    /// ADC, honouring the decimal flag
    fn adc(a: Self, w: Self, p: &mut Status) -> Self;
    /// SBC, honouring the decimal flag
    fn sbc(a: Self, w: Self, p: &mut Status) -> Self;
}

pub fn update_nz<W: Word>(p: &mut Status, v: W) {
    p.set_if(Status::ZERO, v.to_u16() == 0);
    p.set_if(Status::NEGATIVE, v.is_negative());
}

/// CMP/CPX/CPY: carry is set when `reg >= mem`
pub fn compare<W: Word>(p: &mut Status, reg: W, mem: W) {
    let diff = i32::from(reg.to_u16()) - i32::from(mem.to_u16());
    p.set_if(Status::CARRY, diff >= 0);
    update_nz(p, W::from_u16(diff as u16 & W::MASK));
}

/// BIT with a memory operand; the immediate form only touches Z
pub fn bit<W: Word>(p: &mut Status, a: W, mem: W, immediate: bool) {
    p.set_if(Status::ZERO, a.to_u16() & mem.to_u16() == 0);
    if !immediate {
        p.set_if(Status::NEGATIVE, mem.is_negative());
        p.set_if(Status::OVERFLOW, mem.to_u16() & (W::SIGN >> 1) > 0);
    }
}

pub fn asl<W: Word>(p: &mut Status, v: W) -> W {
    let v = v.to_u16();
    p.set_if(Status::CARRY, v & W::SIGN > 0);
    let res = W::from_u16((v << 1) & W::MASK);
    update_nz(p, res);
    res
}

pub fn lsr<W: Word>(p: &mut Status, v: W) -> W {
    let v = v.to_u16();
    p.set_if(Status::CARRY, v & 1 > 0);
    let res = W::from_u16(v >> 1);
    update_nz(p, res);
    res
}

pub fn rol<W: Word>(p: &mut Status, v: W) -> W {
    let v = v.to_u16();
    let carry = p.has(Status::CARRY) as u16;
    p.set_if(Status::CARRY, v & W::SIGN > 0);
    let res = W::from_u16(((v << 1) | carry) & W::MASK);
    update_nz(p, res);
    res
}

pub fn ror<W: Word>(p: &mut Status, v: W) -> W {
    let v = v.to_u16();
    let carry = if p.has(Status::CARRY) { W::SIGN } else { 0 };
    p.set_if(Status::CARRY, v & 1 > 0);
    let res = W::from_u16((v >> 1) | carry);
    update_nz(p, res);
    res
}

pub fn inc<W: Word>(p: &mut Status, v: W) -> W {
    let res = W::from_u16(v.to_u16().wrapping_add(1) & W::MASK);
    update_nz(p, res);
    res
}

pub fn dec<W: Word>(p: &mut Status, v: W) -> W {
    let res = W::from_u16(v.to_u16().wrapping_sub(1) & W::MASK);
    update_nz(p, res);
    res
}

/// TSB: Z from `a & mem`, returns `mem | a`
pub fn tsb<W: Word>(p: &mut Status, a: W, mem: W) -> W {
    p.set_if(Status::ZERO, a.to_u16() & mem.to_u16() == 0);
    W::from_u16(mem.to_u16() | a.to_u16())
}

/// TRB: Z from `a & mem`, returns `mem & !a`
pub fn trb<W: Word>(p: &mut Status, a: W, mem: W) -> W {
    p.set_if(Status::ZERO, a.to_u16() & mem.to_u16() == 0);
    W::from_u16(mem.to_u16() & !a.to_u16())
}

impl Word for u8 {
    const MASK: u16 = 0xff;
    const SIGN: u16 = 0x80;

    fn from_u16(v: u16) -> Self {
        (v & 0xff) as u8
    }

    fn to_u16(self) -> u16 {
        self.into()
    }

    fn adc(a: u8, w: u8, p: &mut Status) -> u8 {
        let carry = p.has(Status::CARRY) as u8;
        let res = if p.has(Status::DECIMAL) {
            let mut a1 = (a & 0xf) + (w & 0xf) + carry;
            let mut a2 = a >> 4;
            if a1 > 9 {
                a1 = (a1 - 10) & 0xf;
                a2 += 1;
            }
            a2 += w >> 4;
            if a2 > 9 {
                a2 = (a2 - 10) & 0xf;
                *p |= Status::CARRY;
            } else {
                *p &= !Status::CARRY;
            }
            (a2 << 4) | a1
        } else {
            let sum = u16::from(a) + u16::from(w) + u16::from(carry);
            p.set_if(Status::CARRY, sum >= 0x100);
            sum as u8
        };
        p.set_if(Status::OVERFLOW, !(a ^ w) & (w ^ res) & 0x80 > 0);
        update_nz(p, res);
        res
    }

    fn sbc(a: u8, w: u8, p: &mut Status) -> u8 {
        let borrow = !p.has(Status::CARRY) as u8;
        let res = if p.has(Status::DECIMAL) {
            let mut a1 = (a & 0xf).wrapping_sub((w & 0xf) + borrow);
            let mut a2 = (a >> 4).wrapping_sub(w >> 4);
            if a1 > 9 {
                a1 = a1.wrapping_add(10);
                a2 = a2.wrapping_sub(1);
            }
            if a2 > 9 {
                a2 = a2.wrapping_add(10);
                *p &= !Status::CARRY;
            } else {
                *p |= Status::CARRY;
            }
            ((a2 & 0xf) << 4) | (a1 & 0xf)
        } else {
            let diff = i16::from(a) - i16::from(w) - i16::from(borrow);
            p.set_if(Status::CARRY, diff >= 0);
            diff as u8
        };
        p.set_if(Status::OVERFLOW, (a ^ w) & (a ^ res) & 0x80 > 0);
        update_nz(p, res);
        res
    }
}

impl Word for u16 {
    const MASK: u16 = 0xffff;
    const SIGN: u16 = 0x8000;

    fn from_u16(v: u16) -> Self {
        v
    }

    fn to_u16(self) -> u16 {
        self
    }

    fn adc(a: u16, w: u16, p: &mut Status) -> u16 {
        let carry = p.has(Status::CARRY) as u16;
        let res = if p.has(Status::DECIMAL) {
            let mut n = [a & 0xf, (a >> 4) & 0xf, (a >> 8) & 0xf, a >> 12];
            let m = [w & 0xf, (w >> 4) & 0xf, (w >> 8) & 0xf, w >> 12];
            n[0] += m[0] + carry;
            for i in 0..3 {
                if n[i] > 9 {
                    n[i] = (n[i] - 10) & 0xf;
                    n[i + 1] += 1;
                }
                n[i + 1] += m[i + 1];
            }
            if n[3] > 9 {
                n[3] = (n[3] - 10) & 0xf;
                *p |= Status::CARRY;
            } else {
                *p &= !Status::CARRY;
            }
            (n[3] << 12) | (n[2] << 8) | (n[1] << 4) | n[0]
        } else {
            let sum = u32::from(a) + u32::from(w) + u32::from(carry);
            p.set_if(Status::CARRY, sum >= 0x10000);
            sum as u16
        };
        p.set_if(Status::OVERFLOW, !(a ^ w) & (w ^ res) & 0x8000 > 0);
        update_nz(p, res);
        res
    }

    fn sbc(a: u16, w: u16, p: &mut Status) -> u16 {
        let borrow = !p.has(Status::CARRY) as u8;
        let res = if p.has(Status::DECIMAL) {
            let nibble = |v: u16, i: u16| ((v >> (4 * i)) & 0xf) as u8;
            let mut n = [0u8; 4];
            for i in 0..4 {
                n[i] = nibble(a, i as u16).wrapping_sub(nibble(w, i as u16));
            }
            n[0] = n[0].wrapping_sub(borrow);
            for i in 0..3 {
                if n[i] > 9 {
                    n[i] = n[i].wrapping_add(10);
                    n[i + 1] = n[i + 1].wrapping_sub(1);
                }
            }
            if n[3] > 9 {
                n[3] = n[3].wrapping_add(10);
                *p &= !Status::CARRY;
            } else {
                *p |= Status::CARRY;
            }
            n.iter()
                .enumerate()
                .fold(0, |acc, (i, v)| acc | (u16::from(v & 0xf) << (4 * i)))
        } else {
            let diff = i32::from(a) - i32::from(w) - i32::from(borrow);
            p.set_if(Status::CARRY, diff >= 0);
            diff as u16
        };
        p.set_if(Status::OVERFLOW, (a ^ w) & (a ^ res) & 0x8000 > 0);
        update_nz(p, res);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(p: Status) -> (bool, bool, bool, bool) {
        (
            p.has(Status::NEGATIVE),
            p.has(Status::ZERO),
            p.has(Status::CARRY),
            p.has(Status::OVERFLOW),
        )
    }

    #[test]
    fn binary_adc8() {
        let mut p = Status(0);
        assert_eq!(u8::adc(0x15, 0x27, &mut p), 0x3c);
        assert_eq!(flags(p), (false, false, false, false));

        let mut p = Status::CARRY;
        assert_eq!(u8::adc(0x7f, 0x00, &mut p), 0x80);
        assert_eq!(flags(p), (true, false, false, true));

        let mut p = Status(0);
        assert_eq!(u8::adc(0xff, 0x01, &mut p), 0x00);
        assert_eq!(flags(p), (false, true, true, false));
    }

    #[test]
    fn decimal_adc8() {
        let mut p = Status::DECIMAL;
        assert_eq!(u8::adc(0x99, 0x01, &mut p), 0x00);
        assert!(p.has(Status::CARRY));
        assert!(p.has(Status::ZERO));

        let mut p = Status::DECIMAL | Status::CARRY;
        assert_eq!(u8::adc(0x19, 0x28, &mut p), 0x48);
        assert!(!p.has(Status::CARRY));
    }

    #[test]
    fn decimal_adc16() {
        let mut p = Status::DECIMAL;
        assert_eq!(u16::adc(0x9999, 0x0001, &mut p), 0x0000);
        assert!(p.has(Status::CARRY));

        let mut p = Status::DECIMAL;
        assert_eq!(u16::adc(0x1234, 0x0766, &mut p), 0x2000);
        assert!(!p.has(Status::CARRY));
    }

    #[test]
    fn binary_sbc() {
        let mut p = Status::CARRY;
        assert_eq!(u8::sbc(0x50, 0x30, &mut p), 0x20);
        assert_eq!(flags(p), (false, false, true, false));

        let mut p = Status::CARRY;
        assert_eq!(u8::sbc(0x50, 0xb0, &mut p), 0xa0);
        assert_eq!(flags(p), (true, false, false, true));

        let mut p = Status(0);
        assert_eq!(u16::sbc(0x0000, 0x0000, &mut p), 0xffff);
        assert_eq!(flags(p), (true, false, false, false));
    }

    #[test]
    fn decimal_sbc() {
        let mut p = Status::DECIMAL | Status::CARRY;
        assert_eq!(u8::sbc(0x00, 0x01, &mut p), 0x99);
        assert!(!p.has(Status::CARRY));

        let mut p = Status::DECIMAL | Status::CARRY;
        assert_eq!(u8::sbc(0x42, 0x15, &mut p), 0x27);
        assert!(p.has(Status::CARRY));

        let mut p = Status::DECIMAL | Status::CARRY;
        assert_eq!(u16::sbc(0x1000, 0x0001, &mut p), 0x0999);
        assert!(p.has(Status::CARRY));

        let mut p = Status::DECIMAL;
        assert_eq!(u16::sbc(0x0000, 0x0000, &mut p), 0x9999);
        assert!(!p.has(Status::CARRY));
    }

    #[test]
    fn compare_sets_carry_on_greater_or_equal() {
        let mut p = Status(0);
        compare(&mut p, 0x40u8, 0x40);
        assert_eq!(flags(p), (false, true, true, false));
        compare(&mut p, 0x40u8, 0x41);
        assert_eq!(flags(p), (true, false, false, false));
        compare(&mut p, 0x8000u16, 0x0001);
        assert_eq!(flags(p), (false, false, true, false));
    }

    #[test]
    fn bit_takes_flags_from_memory() {
        let mut p = Status(0);
        bit(&mut p, 0x01u8, 0xc0, false);
        assert_eq!(flags(p), (true, true, false, true));
        let mut p = Status(0);
        bit(&mut p, 0x0001u16, 0x4001, false);
        assert_eq!(flags(p), (false, false, false, true));
        let mut p = Status(0);
        bit(&mut p, 0x01u8, 0xc0, true);
        assert_eq!(flags(p), (false, true, false, false));
    }

    #[test]
    fn rotates_through_carry() {
        let mut p = Status::CARRY;
        assert_eq!(rol(&mut p, 0x80u8), 0x01);
        assert!(p.has(Status::CARRY));
        assert_eq!(ror(&mut p, 0x0002u16), 0x8001);
        assert!(!p.has(Status::CARRY));
        assert!(p.has(Status::NEGATIVE));
        assert_eq!(asl(&mut p, 0x4000u16), 0x8000);
        assert_eq!(lsr(&mut p, 0x01u8), 0x00);
        assert!(p.has(Status::ZERO) && p.has(Status::CARRY));
    }
}
