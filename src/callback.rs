use std::sync::mpsc;
use std::thread;

use crate::utils::{Error, Result};

/// A sink which is fed items one at a time and produces a single result
/// once all items have been delivered.
pub trait CallFinish: Send + 'static {
    type CallType;
    type ReturnType;
    fn call(&mut self, f: Self::CallType);
    fn finish(&mut self) -> Result<Self::ReturnType>;
}

fn call_all<T: Send + 'static, U: Send + 'static>(
    recv: mpsc::Receiver<T>,
    mut cf: Box<dyn CallFinish<CallType = T, ReturnType = U>>,
) -> Result<U> {
    for m in recv.iter() {
        cf.call(m);
    }

    cf.finish()
}

/// Runs a [`CallFinish`] on its own thread. Items passed to `call` are
/// queued on a bounded channel; `finish` closes the channel and joins the
/// thread.
pub struct Callback<T, U> {
    send: Option<mpsc::SyncSender<T>>,
    result: Option<thread::JoinHandle<Result<U>>>,
    send_failed: bool,
}

impl<T, U> Callback<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    pub fn new(cf: Box<dyn CallFinish<CallType = T, ReturnType = U>>) -> Callback<T, U> {
        let (send, recv) = mpsc::sync_channel(1);

        let result = thread::spawn(move || call_all(recv, cf));

        Callback {
            send: Some(send),
            result: Some(result),
            send_failed: false,
        }
    }
}

impl<T, U> CallFinish for Callback<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    type CallType = T;
    type ReturnType = U;
    fn call(&mut self, t: T) {
        match &self.send {
            Some(s) => {
                if s.send(t).is_err() {
                    //worker has gone: the error surfaces from finish
                    self.send_failed = true;
                }
            }
            _ => {}
        }
    }

    fn finish(&mut self) -> Result<U> {
        self.send = None;

        match self.result.take() {
            Some(r) => match r.join() {
                Ok(p) => {
                    if self.send_failed && p.is_ok() {
                        return Err(Error::Worker(String::from("worker stopped accepting items")));
                    }
                    p
                }
                Err(e) => Err(Error::Worker(format!("failed to join {:?}", e))),
            },
            None => Err(Error::Worker(String::from("already called finish"))),
        }
    }
}

pub trait CollectResult: Send + 'static {
    type InType;
    type OutType;
    fn collect(&self, a: Vec<Self::InType>) -> Self::OutType;
}

/// Distributes items round-robin over several callbacks and combines their
/// results with a [`CollectResult`]. `finish` waits for every callback, so
/// it acts as the barrier between processing stages.
pub struct CallbackMerge<T, U, V> {
    callbacks: Vec<Box<dyn CallFinish<CallType = T, ReturnType = U>>>,
    collect: Box<dyn CollectResult<InType = U, OutType = V>>,
    idx: usize,
}

impl<T, U, V> CallbackMerge<T, U, V>
where
    T: Send + 'static,
    U: Send + 'static,
    V: Send + 'static,
{
    pub fn new(
        callbacks: Vec<Box<dyn CallFinish<CallType = T, ReturnType = U>>>,
        collect: Box<dyn CollectResult<InType = U, OutType = V>>,
    ) -> CallbackMerge<T, U, V> {
        CallbackMerge {
            callbacks: callbacks,
            collect: collect,
            idx: 0,
        }
    }
}

impl<T, U, V> CallFinish for CallbackMerge<T, U, V>
where
    T: Send + 'static,
    U: Send + 'static,
    V: Send + 'static,
{
    type CallType = T;
    type ReturnType = V;

    fn call(&mut self, t: T) {
        let l = self.callbacks.len();
        self.callbacks[self.idx % l].call(t);
        self.idx += 1;
    }

    fn finish(&mut self) -> Result<Self::ReturnType> {
        let mut r = Vec::new();
        let mut err: Option<Error> = None;
        for c in self.callbacks.iter_mut() {
            match c.finish() {
                Ok(s) => {
                    r.push(s);
                }
                Err(e) => {
                    if err.is_none() {
                        err = Some(e);
                    }
                }
            }
        }

        match err {
            Some(e) => Err(e),
            None => Ok(self.collect.collect(r)),
        }
    }
}

/// Collects worker results into a `Vec`, in worker order.
pub struct CollectVec<U>(std::marker::PhantomData<fn() -> U>);

impl<U> CollectVec<U> {
    pub fn new() -> CollectVec<U> {
        CollectVec(std::marker::PhantomData)
    }
}

impl<U: Send + 'static> CollectResult for CollectVec<U> {
    type InType = U;
    type OutType = Vec<U>;
    fn collect(&self, a: Vec<U>) -> Vec<U> {
        a
    }
}

/// Runs `items` through `numchan` workers built by `make_worker` and waits
/// for all of them. With `numchan == 0` everything runs on the calling
/// thread.
pub fn run_workers<T, U, F>(items: Vec<T>, numchan: usize, make_worker: F) -> Result<Vec<U>>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(usize) -> Box<dyn CallFinish<CallType = T, ReturnType = U>>,
{
    if numchan == 0 {
        let mut w = make_worker(0);
        for t in items {
            w.call(t);
        }
        return Ok(vec![w.finish()?]);
    }

    let mut callbacks: Vec<Box<dyn CallFinish<CallType = T, ReturnType = U>>> = Vec::new();
    for i in 0..numchan {
        callbacks.push(Box::new(Callback::new(make_worker(i))));
    }
    let mut merge = CallbackMerge::new(callbacks, Box::new(CollectVec::new()));
    for t in items {
        merge.call(t);
    }
    merge.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SumItems(i64);
    impl CallFinish for SumItems {
        type CallType = i64;
        type ReturnType = i64;
        fn call(&mut self, t: i64) {
            self.0 += t;
        }
        fn finish(&mut self) -> Result<i64> {
            Ok(self.0)
        }
    }

    struct FailOnNegative(bool);
    impl CallFinish for FailOnNegative {
        type CallType = i64;
        type ReturnType = ();
        fn call(&mut self, t: i64) {
            if t < 0 {
                self.0 = true;
            }
        }
        fn finish(&mut self) -> Result<()> {
            if self.0 {
                return Err(Error::InvalidInput(String::from("negative")));
            }
            Ok(())
        }
    }

    #[test]
    fn test_run_workers_sums() {
        let items: Vec<i64> = (1..=100).collect();
        let res = run_workers(items.clone(), 4, |_| Box::new(SumItems(0))).unwrap();
        assert_eq!(res.len(), 4);
        assert_eq!(res.iter().sum::<i64>(), 5050);

        let res0 = run_workers(items, 0, |_| Box::new(SumItems(0))).unwrap();
        assert_eq!(res0, vec![5050]);
    }

    #[test]
    fn test_run_workers_propagates_error() {
        let items = vec![1, 2, -3, 4];
        let res = run_workers(items, 2, |_| Box::new(FailOnNegative(false)));
        assert!(res.is_err());
    }
}
