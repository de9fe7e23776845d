use mockall::mock;

use crate::DropObserver;

mock! {
    pub Observer {}

    impl DropObserver for Observer {
        fn dropped(&self, id: u64);
    }
}
