/// Compatibility layer for rayon/sequential execution.
///
/// When the `parallel` feature is enabled, this re-exports rayon's parallel iterators
/// and slice extensions. When disabled, it provides sequential fallbacks that
/// implement the same API surface used by the index builder and the façade.
#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
mod sequential {
    /// Sequential stand-in for `rayon::prelude::IntoParallelIterator`.
    pub trait IntoParallelIterator {
        type Iter;
        type Item;
        fn into_par_iter(self) -> Self::Iter;
    }

    impl<I: IntoIterator> IntoParallelIterator for I {
        type Iter = I::IntoIter;
        type Item = I::Item;
        fn into_par_iter(self) -> Self::Iter {
            self.into_iter()
        }
    }

    /// Sequential stand-in for `rayon::prelude::ParallelSliceMut`.
    ///
    /// `par_sort_by_key` keeps rayon's stability guarantee because `sort_by_key` is stable too.
    pub trait ParallelSliceMut<T> {
        fn par_sort_by_key<K, F>(&mut self, f: F)
        where
            K: Ord,
            F: Fn(&T) -> K;
    }

    impl<T> ParallelSliceMut<T> for [T] {
        fn par_sort_by_key<K, F>(&mut self, f: F)
        where
            K: Ord,
            F: Fn(&T) -> K,
        {
            self.sort_by_key(f);
        }
    }
}

#[cfg(not(feature = "parallel"))]
pub use sequential::*;
