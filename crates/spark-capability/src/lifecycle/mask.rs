//! 必需契约的满足位图。

use alloc::vec;
use alloc::vec::Vec;

const WORD_BITS: usize = u64::BITS as usize;

/// 固定宽度的位集合，第 `i` 位表示第 `i` 个必需契约当前至少有一个提供者。
///
/// - **契约 (What)**：宽度为 0 时视为“全部满足”；越界下标的写操作被忽略并返回 `false`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SatisfactionMask {
    words: Vec<u64>,
    width: usize,
}

impl SatisfactionMask {
    /// 构造全部清零的位图。
    pub fn new(width: usize) -> Self {
        Self {
            words: vec![0; width.div_ceil(WORD_BITS)],
            width,
        }
    }

    /// 位图宽度。
    pub fn width(&self) -> usize {
        self.width
    }

    /// 置位，返回位是否发生变化。
    pub fn set(&mut self, index: usize) -> bool {
        if index >= self.width {
            return false;
        }
        let (word, bit) = locate(index);
        let before = self.words[word];
        self.words[word] |= bit;
        before != self.words[word]
    }

    /// 清位，返回位是否发生变化。
    pub fn clear(&mut self, index: usize) -> bool {
        if index >= self.width {
            return false;
        }
        let (word, bit) = locate(index);
        let before = self.words[word];
        self.words[word] &= !bit;
        before != self.words[word]
    }

    pub fn is_set(&self, index: usize) -> bool {
        if index >= self.width {
            return false;
        }
        let (word, bit) = locate(index);
        self.words[word] & bit != 0
    }

    /// 全部位是否都已置位。
    pub fn is_full(&self) -> bool {
        self.count_set() == self.width
    }

    pub fn count_set(&self) -> usize {
        self.words
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum()
    }

    /// 清零全部位。
    pub fn reset(&mut self) {
        self.words.iter_mut().for_each(|word| *word = 0);
    }

    /// 未置位的下标，升序。
    pub fn missing_indices(&self) -> Vec<usize> {
        (0..self.width).filter(|&index| !self.is_set(index)).collect()
    }
}

fn locate(index: usize) -> (usize, u64) {
    (index / WORD_BITS, 1u64 << (index % WORD_BITS))
}
