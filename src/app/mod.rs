pub mod state;

/// Next index, stopping at the last item.
pub fn increment(x: usize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    (x + 1).min(len - 1)
}

/// Previous index, stopping at the first item.
pub fn decrement(x: usize, len: usize) -> usize {
    x.saturating_sub(1).min(len.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stepping_stops_at_the_ends() {
        assert_eq!(increment(0, 3), 1);
        assert_eq!(increment(2, 3), 2);
        assert_eq!(decrement(1, 3), 0);
        assert_eq!(decrement(0, 3), 0);
        assert_eq!(increment(0, 0), 0);
        assert_eq!(decrement(0, 0), 0);
    }
}
