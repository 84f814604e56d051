pub mod mock_stomp;
