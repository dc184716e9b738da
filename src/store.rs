use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: T,
    observers: Vec<(u64, Observer<T>)>,
    next_id: u64,
}

/// 値の変更を購読者へ通知するリアクティブなコンテナ。
///
/// 変更は同期的に反映され、`set`・`update`の呼び出しが戻る前に全ての購読者へ通知される。
/// 通知はまとめられず、変更ごとに1回行われる。
pub struct Store<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default + Clone + Send + 'static> Default for Store<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + Send + 'static> Store<T> {
    /// 新しい`Store`を返す。
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value,
                observers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// 現在の値のコピーを返す。
    pub fn get(&self) -> T {
        self.lock().value.clone()
    }

    /// 値を置き換える。
    pub fn set(&self, value: T) {
        self.update(|current| *current = value);
    }

    /// 関数で値を更新する。
    ///
    /// # Arguments
    ///
    /// * `f` - 現在の値を受け取り、その場で書き換える関数
    ///
    /// 通知はlockの外で行う。前の呼び出しが戻ってから行った変更は、
    /// 別のスレッドからでも変更した順に通知される。
    /// 複数のスレッドから同時に変更した場合や購読者の中で変更した場合は、
    /// 通知の順序が入れ替わり、最後に通知された値が最新とは限らない。
    /// 最新の値が必要な場合は`get`で読み直す。
    pub fn update<F: FnOnce(&mut T)>(&self, f: F) {
        let (value, observers) = {
            let mut inner = self.lock();
            f(&mut inner.value);
            let observers: Vec<Observer<T>> = inner
                .observers
                .iter()
                .map(|(_, observer)| Arc::clone(observer))
                .collect();
            (inner.value.clone(), observers)
        };
        // lockを解放してから通知するので、購読者の中でstoreを読み書きできる
        for observer in observers {
            observer(&value);
        }
    }

    /// 値の変更を購読する。
    ///
    /// 購読者は登録時に現在の値で1回呼ばれ、以降は変更のたびに呼ばれる。
    /// 返された`Subscription`をdropすると購読は解除される。
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let observer: Observer<T> = Arc::new(observer);
        let (id, value) = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.observers.push((id, Arc::clone(&observer)));
            (id, inner.value.clone())
        };
        observer(&value);

        let weak = Arc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                    inner.observers.retain(|(observer_id, _)| *observer_id != id);
                }
            })),
        }
    }

    /// 登録されている購読者の数を返す。
    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `Store::subscribe`が返す購読のハンドル。
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// 購読を解除する。
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
