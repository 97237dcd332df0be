#!/usr/bin/env rustc
//! 押下キー集合とキーシム分類のスタンドアロンテスト
//! macOS でも実行可能（Linux 依存なし）
//!
//! 実行: rustc tests/standalone_test.rs -o /tmp/keyseat_test && /tmp/keyseat_test

fn main() {
    test_pressed_insert_remove();
    test_pressed_remove_absent();
    test_pressed_swap_removal();
    test_pressed_duplicate_rejected();
    test_pressed_capacity();
    test_pressed_consumer_fixed_at_press();
    test_vt_switch_range();
    test_modifier_keysyms();
    test_fold_keysym();
    eprintln!("\n=== 全テスト通過 ===");
}

// ========== 押下キー集合 ==========

const CAP: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consumer {
    Mapping,
    ImeGrab,
    Focus,
}

/// 固定長配列 + 長さ。削除は末尾要素とのスワップ
struct Pressed {
    entries: [(u32, Consumer); CAP],
    len: usize,
}

impl Pressed {
    fn new() -> Self {
        Self {
            entries: [(0, Consumer::Focus); CAP],
            len: 0,
        }
    }

    fn contains(&self, code: u32) -> bool {
        self.entries[..self.len].iter().any(|e| e.0 == code)
    }

    /// 満杯・重複は拒否 (ルータの押下ガードと同じ判定)
    fn insert(&mut self, code: u32, consumer: Consumer) -> bool {
        if self.len == CAP || self.contains(code) {
            return false;
        }
        self.entries[self.len] = (code, consumer);
        self.len += 1;
        true
    }

    fn remove(&mut self, code: u32) -> Option<Consumer> {
        let idx = self.entries[..self.len].iter().position(|e| e.0 == code)?;
        let consumer = self.entries[idx].1;
        self.entries[idx] = self.entries[self.len - 1];
        self.len -= 1;
        Some(consumer)
    }
}

fn test_pressed_insert_remove() {
    let mut p = Pressed::new();
    assert!(p.insert(10, Consumer::Focus));
    assert!(p.insert(20, Consumer::Mapping));
    assert!(p.insert(30, Consumer::ImeGrab));
    assert_eq!(p.len, 3);

    // リリースは押下時のコンシューマを返す
    assert_eq!(p.remove(20), Some(Consumer::Mapping));
    assert_eq!(p.remove(10), Some(Consumer::Focus));
    assert_eq!(p.remove(30), Some(Consumer::ImeGrab));
    assert_eq!(p.len, 0);
    eprintln!("[OK] pressed insert/remove");
}

fn test_pressed_remove_absent() {
    let mut p = Pressed::new();
    // 追跡していないキーのリリースは None (正常系)
    assert_eq!(p.remove(42), None);

    p.insert(1, Consumer::Focus);
    assert_eq!(p.remove(42), None);
    assert_eq!(p.len, 1);
    eprintln!("[OK] pressed remove absent");
}

fn test_pressed_swap_removal() {
    let mut p = Pressed::new();
    for code in 1..=5 {
        p.insert(code, Consumer::Focus);
    }

    // 中間を削除しても残りは失われない
    assert_eq!(p.remove(2), Some(Consumer::Focus));
    assert_eq!(p.len, 4);
    for code in [1, 3, 4, 5] {
        assert!(p.contains(code));
    }
    assert!(!p.contains(2));
    eprintln!("[OK] pressed swap removal");
}

fn test_pressed_duplicate_rejected() {
    let mut p = Pressed::new();
    assert!(p.insert(10, Consumer::Focus));

    // 重複押下は拒否、元のエントリはそのまま
    assert!(!p.insert(10, Consumer::Mapping));
    assert_eq!(p.len, 1);
    assert_eq!(p.remove(10), Some(Consumer::Focus));
    eprintln!("[OK] pressed duplicate rejected");
}

fn test_pressed_capacity() {
    let mut p = Pressed::new();
    for code in 0..CAP as u32 {
        assert!(p.insert(code, Consumer::Focus));
    }
    assert_eq!(p.len, CAP);

    // 33 個目は拒否、既存メンバーは不変
    assert!(!p.insert(200, Consumer::Focus));
    assert_eq!(p.len, CAP);
    assert!(!p.contains(200));
    assert!(p.contains(0));

    // 拒否された押下に対応するリリースは来ても無視される
    assert_eq!(p.remove(200), None);

    // 保持中のキーは通常どおり解放できる
    assert_eq!(p.remove(0), Some(Consumer::Focus));
    assert_eq!(p.len, CAP - 1);
    eprintln!("[OK] pressed capacity");
}

fn test_pressed_consumer_fixed_at_press() {
    let mut p = Pressed::new();
    // 押下時点ではフォーカスへ配送された
    p.insert(12, Consumer::Focus);

    // その後グラブが入っても、リリースは押下時の配送先へ向かう
    assert_eq!(p.remove(12), Some(Consumer::Focus));
    eprintln!("[OK] pressed consumer fixed at press");
}

// ========== キーシム分類 ==========

const KEYSYM_XF86_SWITCH_VT_1: u32 = 0x1008FE01;
const KEYSYM_XF86_SWITCH_VT_12: u32 = 0x1008FE0C;
const KEYSYM_SHIFT_L: u32 = 0xffe1;
const KEYSYM_HYPER_R: u32 = 0xffee;
const KEYSYM_ISO_LEVEL3_SHIFT: u32 = 0xfe03;
const KEYSYM_ISO_LEVEL5_SHIFT: u32 = 0xfe11;
const KEYSYM_RETURN: u32 = 0xff0d;
const KEYSYM_F1: u32 = 0xffbe;

fn vt_switch_target(keysym: u32) -> Option<u32> {
    if (KEYSYM_XF86_SWITCH_VT_1..=KEYSYM_XF86_SWITCH_VT_12).contains(&keysym) {
        Some(keysym - KEYSYM_XF86_SWITCH_VT_1 + 1)
    } else {
        None
    }
}

fn keysym_is_modifier(keysym: u32) -> bool {
    (KEYSYM_SHIFT_L..=KEYSYM_HYPER_R).contains(&keysym)
        || keysym == KEYSYM_ISO_LEVEL3_SHIFT
        || keysym == KEYSYM_ISO_LEVEL5_SHIFT
}

fn test_vt_switch_range() {
    assert_eq!(vt_switch_target(KEYSYM_XF86_SWITCH_VT_1), Some(1));
    assert_eq!(vt_switch_target(0x1008FE07), Some(7));
    assert_eq!(vt_switch_target(KEYSYM_XF86_SWITCH_VT_12), Some(12));

    // 範囲外
    assert_eq!(vt_switch_target(KEYSYM_XF86_SWITCH_VT_12 + 1), None);
    assert_eq!(vt_switch_target(KEYSYM_F1), None);
    assert_eq!(vt_switch_target(0x61), None);
    eprintln!("[OK] vt switch range");
}

fn test_modifier_keysyms() {
    assert!(keysym_is_modifier(KEYSYM_SHIFT_L));
    assert!(keysym_is_modifier(KEYSYM_HYPER_R));
    assert!(keysym_is_modifier(KEYSYM_ISO_LEVEL3_SHIFT));
    assert!(keysym_is_modifier(KEYSYM_ISO_LEVEL5_SHIFT));

    // 修飾キー以外
    assert!(!keysym_is_modifier(0x61)); // 'a'
    assert!(!keysym_is_modifier(KEYSYM_RETURN));
    assert!(!keysym_is_modifier(KEYSYM_F1));
    eprintln!("[OK] modifier keysyms");
}

// ========== マッピング照合のケース畳み込み ==========

/// ASCII / Latin-1 の大文字キーシムを小文字へ
fn fold_keysym(keysym: u32) -> u32 {
    match keysym {
        0x41..=0x5a => keysym + 0x20,
        0xc0..=0xde if keysym != 0xd7 => keysym + 0x20,
        _ => keysym,
    }
}

fn test_fold_keysym() {
    assert_eq!(fold_keysym(0x41), 0x61); // A -> a
    assert_eq!(fold_keysym(0x5a), 0x7a); // Z -> z
    assert_eq!(fold_keysym(0x61), 0x61); // a は不変
    assert_eq!(fold_keysym(0xc0), 0xe0); // Agrave -> agrave
    assert_eq!(fold_keysym(0xde), 0xfe); // Thorn -> thorn
    assert_eq!(fold_keysym(0xd7), 0xd7); // multiply は文字でないので不変
    assert_eq!(fold_keysym(KEYSYM_RETURN), KEYSYM_RETURN);
    eprintln!("[OK] fold keysym");
}
